use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::AnalysisCatalog;
use crate::config::PipelineConfig;
use crate::data::Table;
use crate::errors::PipelineError;
use crate::hash::job_rng;
use crate::heuristics::{format_with_commas, partition_ranges, sample_size, shard_sizes};
use crate::job::{Job, Subset, TaskMessage, task_id};
use crate::probe::{CapacityProbe, draw_probe_subset};
use crate::source::DatasetCatalog;
use crate::transport::{ArtifactStore, TaskQueue, keys, put_json};
use crate::types::JobId;

const SAMPLE_STREAM: &str = "sample";

/// Everything the completion monitor needs about a dispatched job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub job_id: JobId,
    /// Tasks enqueued across every subset; the monitor's completion target.
    pub num_tasks_dispatched: usize,
    /// Single global task count per subset derived from the probe.
    pub workers_per_shard: usize,
    /// Probe extrapolation `T * R / t`; `None` when the probe was too fast to time.
    pub rows_per_worker: Option<f64>,
    pub start_time: DateTime<Utc>,
    pub job_timeout_secs: u64,
}

/// Uniform sample of `fraction` of the rows of `table`, without replacement.
pub fn sample_rows<R: Rng + ?Sized>(table: &Table, fraction: f64, rng: &mut R) -> Table {
    let size = sample_size(table.len(), fraction);
    let positions = rand::seq::index::sample(rng, table.len(), size).into_vec();
    table.select_rows(&positions)
}

/// Split `sample` into `k` contiguous, disjoint subsets whose sizes differ by at most one.
pub fn shard_into_subsets(sample: &Table, k: usize) -> Vec<Table> {
    let mut offset = 0;
    shard_sizes(sample.len(), k)
        .into_iter()
        .map(|size| {
            let subset = sample.slice(offset, offset + size);
            offset += size;
            subset
        })
        .collect()
}

/// Samples, shards, probes, and enqueues the time-budgeted tasks of a job.
pub struct Dispatcher {
    /// Destination for subset artifacts.
    store: Arc<dyn ArtifactStore>,
    /// Transport the worker pool drains.
    queue: Arc<dyn TaskQueue>,
    /// Routines addressable by `script_ref`; used here only for the probe.
    routines: AnalysisCatalog,
    /// Confidential datasets addressable by `dataset_id`.
    datasets: DatasetCatalog,
    config: PipelineConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        queue: Arc<dyn TaskQueue>,
        routines: AnalysisCatalog,
        datasets: DatasetCatalog,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            routines,
            datasets,
            config,
        }
    }

    /// Dispatch every task of `job`.
    ///
    /// Any failure before the first task is queued, probe failures included,
    /// is returned as `PipelineError::Dispatch` and nothing is enqueued.
    pub fn dispatch(&self, job: &Job) -> Result<DispatchSummary, PipelineError> {
        job.validate()?;
        let start_time = Utc::now();
        let (messages, workers_per_shard, rows_per_worker) = self
            .prepare(job)
            .map_err(|err| PipelineError::dispatch(job.job_id.clone(), err))?;

        for message in &messages {
            self.queue
                .send(message)
                .map_err(|err| PipelineError::dispatch(job.job_id.clone(), err))?;
        }

        info!(
            "[mos:dispatch] job '{}' dispatched {} tasks ({} per subset, k={})",
            job.job_id,
            format_with_commas(messages.len() as u128),
            workers_per_shard,
            job.shard_count
        );
        Ok(DispatchSummary {
            job_id: job.job_id.clone(),
            num_tasks_dispatched: messages.len(),
            workers_per_shard,
            rows_per_worker: rows_per_worker.is_finite().then_some(rows_per_worker),
            start_time,
            job_timeout_secs: self.config.job_timeout.as_secs(),
        })
    }

    /// Sample, persist subsets, probe, and build task messages without queueing.
    fn prepare(&self, job: &Job) -> Result<(Vec<TaskMessage>, usize, f64), PipelineError> {
        let routine = self.routines.resolve(&job.script_ref)?;
        let dataset = self.datasets.resolve(&job.dataset_id)?.load()?;
        let mut rng = job_rng(self.config.seed, &job.job_id, SAMPLE_STREAM);

        let sample = sample_rows(&dataset, job.sample_fraction, &mut rng);
        if sample.is_empty() {
            return Err(PipelineError::DatasetUnavailable {
                dataset_id: job.dataset_id.clone(),
                reason: "sample is empty".to_string(),
            });
        }
        debug!(
            "[mos:dispatch] job '{}' sampled {} of {} rows",
            job.job_id,
            sample.len(),
            dataset.len()
        );

        let aux = draw_probe_subset(&sample, job.shard_count, &mut rng);
        put_json(
            self.store.as_ref(),
            &keys::probe_subset(&job.job_id, &job.dataset_id),
            &aux,
        )?;
        let estimate = CapacityProbe::new(self.config.worker_time_budget, self.config.probe_rows)
            .measure(routine.as_ref(), &aux)?;
        let workers_per_shard =
            estimate.workers_per_shard(sample.len().div_ceil(job.shard_count));

        let mut messages = Vec::new();
        for (index, table) in shard_into_subsets(&sample, job.shard_count)
            .into_iter()
            .enumerate()
        {
            let subset = Subset {
                index,
                rows: table.len(),
                artifact: keys::subset(&job.job_id, &job.dataset_id, index),
            };
            if table.is_empty() {
                debug!(
                    "[mos:dispatch] job '{}' subset {} is empty; no tasks",
                    job.job_id, subset.index
                );
                continue;
            }
            put_json(self.store.as_ref(), &subset.artifact, &table)?;
            for range in partition_ranges(subset.rows, workers_per_shard) {
                messages.push(TaskMessage {
                    job_id: job.job_id.clone(),
                    task_id: task_id(&job.dataset_id, subset.index, range),
                    subset_ref: subset.artifact.clone(),
                    script_ref: job.script_ref.clone(),
                    takeout_start_index: range.start,
                    takeout_end_index: range.end,
                });
            }
        }
        Ok((messages, workers_per_shard, estimate.rows_per_worker))
    }
}
