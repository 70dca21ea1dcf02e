use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, error::ErrorKind};

use crate::analysis::{AnalysisCatalog, CommandAnalysis};
use crate::calibrator::{EpsilonAllocation, SanitizedArtifact};
use crate::config::PipelineConfig;
use crate::heuristics::format_with_commas;
use crate::job::Job;
use crate::pipeline::LocalPipeline;
use crate::source::{CsvDataset, DatasetCatalog};
use crate::transport::{FileArtifactStore, InMemoryTaskQueue};

#[derive(Debug, Parser)]
#[command(
    name = "run_job",
    disable_help_subcommand = true,
    about = "Run a full MOS job against a CSV dataset",
    long_about = "Compute the baseline, dispatch leave-one-out tasks, aggregate maximum observed sensitivity, and release a first sanitized run with the default epsilon allocation.",
    after_help = "Sampling options are resolved in order by explicit arg, MOS_* environment variables, then defaults. The analysis program reads a JSON table on stdin and writes a JSON table with `value` and `n` columns on stdout."
)]
struct RunJobCli {
    #[arg(long, value_name = "PATH", help = "CSV dataset with a header row")]
    dataset: PathBuf,
    #[arg(
        long = "dataset-id",
        help = "Dataset id used in task ids and artifact keys (defaults to the file stem)"
    )]
    dataset_id: Option<String>,
    #[arg(long, value_name = "PROGRAM", help = "Analysis program to execute")]
    analysis: PathBuf,
    #[arg(
        long = "analysis-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        help = "Argument passed to the analysis program, repeat as needed"
    )]
    analysis_args: Vec<String>,
    #[arg(long = "job-id", default_value = "1", help = "Job id namespacing every artifact")]
    job_id: String,
    #[arg(
        long = "store-dir",
        value_name = "DIR",
        help = "Artifact store directory (defaults to .mos_store)"
    )]
    store_dir: Option<PathBuf>,
    #[arg(long = "sample-fraction", help = "Fraction of rows drawn into the sample")]
    sample_fraction: Option<f64>,
    #[arg(
        long,
        value_parser = parse_positive_usize,
        help = "Number of disjoint subsets the sample is split into"
    )]
    shards: Option<usize>,
    #[arg(long = "timeout-secs", help = "Wall-clock limit before the job times out")]
    timeout_secs: Option<u64>,
    #[arg(long = "total-epsilon", help = "Total budget for the default allocation")]
    total_epsilon: Option<f64>,
    #[arg(long = "min-cell-size", help = "Smallest n that may be released")]
    min_cell_size: Option<f64>,
    #[arg(long, help = "Optional deterministic seed override")]
    seed: Option<u64>,
    #[arg(
        long = "worker-threads",
        default_value_t = 0,
        help = "Worker threads (0 uses one per core)"
    )]
    worker_threads: usize,
}

#[derive(Debug, Parser)]
#[command(
    name = "sanitize_run",
    disable_help_subcommand = true,
    about = "Release a follow-up sanitized run for an aggregated job",
    long_about = "Apply a user epsilon allocation to an aggregated job. Statistics not named in the allocation keep the previous run's sanitized values."
)]
struct SanitizeRunCli {
    #[arg(long = "job-id", help = "Job id of an aggregated job")]
    job_id: String,
    #[arg(long = "run-id", help = "Run id to write; carries forward from run-id - 1")]
    run_id: u64,
    #[arg(
        long,
        value_name = "PATH",
        help = "JSON allocation: {\"use_default_epsilon\": bool, \"epsilons\": [{\"statistic_id\", \"epsilon\"}]}"
    )]
    allocation: Option<PathBuf>,
    #[arg(
        long = "default-epsilon",
        conflicts_with = "allocation",
        help = "Split the total budget evenly instead of reading an allocation"
    )]
    default_epsilon: bool,
    #[arg(long = "store-dir", value_name = "DIR", help = "Artifact store directory")]
    store_dir: Option<PathBuf>,
    #[arg(long, help = "Optional deterministic seed override")]
    seed: Option<u64>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn run_job_cli<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();
    let Some(cli) =
        parse_cli::<RunJobCli, _>(std::iter::once("run_job".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let mut config = PipelineConfig::default().with_env_overrides()?;
    if let Some(fraction) = cli.sample_fraction {
        config.sample_fraction = fraction;
    }
    if let Some(shards) = cli.shards {
        config.shard_count = shards;
    }
    if let Some(secs) = cli.timeout_secs {
        config.job_timeout = Duration::from_secs(secs);
    }
    if let Some(total) = cli.total_epsilon {
        config.default_total_epsilon = total;
    }
    if let Some(min_cell_size) = cli.min_cell_size {
        config.min_cell_size = min_cell_size;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    let config = config.validated()?;

    let dataset_id = match cli.dataset_id {
        Some(id) => id,
        None => cli
            .dataset
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or("could not derive a dataset id from --dataset; pass --dataset-id")?
            .to_string(),
    };
    let script_ref = cli
        .analysis
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("analysis")
        .to_string();

    let store = Arc::new(open_store(cli.store_dir));
    println!("Persisting artifacts to {}", store.root().display());
    let routines = AnalysisCatalog::new().with(Arc::new(
        CommandAnalysis::new(script_ref.clone(), cli.analysis).with_args(cli.analysis_args),
    ));
    let datasets = DatasetCatalog::new().with(Arc::new(CsvDataset::new(
        dataset_id.clone(),
        cli.dataset,
    )));
    let job = Job::new(cli.job_id, dataset_id, script_ref, &config);
    let pipeline = LocalPipeline::new(
        store,
        Arc::new(InMemoryTaskQueue::new()),
        routines,
        datasets,
        config,
    )
    .with_worker_threads(cli.worker_threads);

    let outcome = pipeline.run_job(&job)?;
    println!(
        "Job '{}' {:?}: {} tasks ({} per subset), {} dropped",
        job.job_id,
        outcome.state,
        format_with_commas(outcome.dispatch.num_tasks_dispatched as u128),
        outcome.dispatch.workers_per_shard,
        outcome.drain.dropped
    );
    print_sanitized(&outcome.sanitized, outcome.mos.records.len());
    Ok(())
}

pub fn run_sanitize_cli<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();
    let Some(cli) = parse_cli::<SanitizeRunCli, _>(
        std::iter::once("sanitize_run".to_string()).chain(args_iter),
    )?
    else {
        return Ok(());
    };

    let allocation = match (cli.allocation, cli.default_epsilon) {
        (_, true) => EpsilonAllocation::uniform(),
        (Some(path), false) => serde_json::from_slice(&fs::read(&path)?)?,
        (None, false) => return Err("pass --allocation PATH or --default-epsilon".into()),
    };

    let mut config = PipelineConfig::default().with_env_overrides()?;
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    let config = config.validated()?;

    let pipeline = LocalPipeline::new(
        Arc::new(open_store(cli.store_dir)),
        Arc::new(InMemoryTaskQueue::new()),
        AnalysisCatalog::new(),
        DatasetCatalog::new(),
        config,
    );
    let sanitized = pipeline.sanitize_run(&cli.job_id, cli.run_id, &allocation)?;
    print_sanitized(&sanitized, sanitized.records.len());
    Ok(())
}

fn open_store(dir: Option<PathBuf>) -> FileArtifactStore {
    match dir {
        Some(dir) => FileArtifactStore::new(dir),
        None => FileArtifactStore::default_location(),
    }
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("could not parse '{raw}' as a positive integer"))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

fn print_sanitized(artifact: &SanitizedArtifact, total_statistics: usize) {
    println!(
        "=== run {} of job '{}': {} of {} statistics released ===",
        artifact.run_id,
        artifact.job_id,
        artifact.records.len(),
        total_statistics
    );
    for record in &artifact.records {
        let identity = record
            .key
            .columns
            .iter()
            .map(|(name, cell)| format!("{name}={cell}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "#{:<4} {identity:<40} value={:>14.4} +/-{:<12.4} epsilon={:.4} (run {})",
            record.statistic_id,
            record.value_sanitized,
            record.noise_percentile,
            record.epsilon,
            record.run_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_is_not_an_error() {
        assert!(parse_cli::<RunJobCli, _>(["run_job", "--help"]).unwrap().is_none());
    }

    #[test]
    fn run_job_requires_dataset_and_analysis() {
        assert!(parse_cli::<RunJobCli, _>(["run_job"]).is_err());
        let cli = parse_cli::<RunJobCli, _>([
            "run_job",
            "--dataset",
            "people.csv",
            "--analysis",
            "./stats.sh",
            "--analysis-arg",
            "--mode=fast",
            "--shards",
            "4",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(cli.shards, Some(4));
        assert_eq!(cli.analysis_args, vec!["--mode=fast"]);
        assert_eq!(cli.job_id, "1");
    }

    #[test]
    fn zero_shards_are_rejected() {
        assert!(
            parse_cli::<RunJobCli, _>([
                "run_job",
                "--dataset",
                "a.csv",
                "--analysis",
                "x",
                "--shards",
                "0"
            ])
            .is_err()
        );
    }

    #[test]
    fn allocation_and_default_conflict() {
        assert!(
            parse_cli::<SanitizeRunCli, _>([
                "sanitize_run",
                "--job-id",
                "1",
                "--run-id",
                "2",
                "--allocation",
                "a.json",
                "--default-epsilon"
            ])
            .is_err()
        );
    }
}
