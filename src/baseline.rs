use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::{AnalysisCatalog, run_analysis};
use crate::data::BaselineRow;
use crate::errors::PipelineError;
use crate::job::{Job, JobStatus, StatusReporter};
use crate::source::DatasetCatalog;
use crate::transport::{ArtifactStore, keys, put_json};
use crate::types::{ColumnName, JobId};

/// True values of every statistic, computed once on the unsampled dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaselineArtifact {
    pub job_id: JobId,
    /// Identifying columns; the aggregator joins on exactly these.
    pub key_columns: Vec<ColumnName>,
    pub rows: Vec<BaselineRow>,
}

/// Runs the analysis against the full dataset and persists the baseline artifact.
pub struct BaselineRunner {
    store: Arc<dyn ArtifactStore>,
    routines: AnalysisCatalog,
    datasets: DatasetCatalog,
    reporter: Arc<dyn StatusReporter>,
}

impl BaselineRunner {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        routines: AnalysisCatalog,
        datasets: DatasetCatalog,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        Self {
            store,
            routines,
            datasets,
            reporter,
        }
    }

    /// Compute and store the baseline, then report the job as running.
    pub fn run(&self, job: &Job) -> Result<BaselineArtifact, PipelineError> {
        job.validate()?;
        let routine = self.routines.resolve(&job.script_ref)?;
        let dataset = self.datasets.resolve(&job.dataset_id)?.load()?;
        let output = run_analysis(routine.as_ref(), &dataset)?;

        let artifact = BaselineArtifact {
            job_id: job.job_id.clone(),
            key_columns: output.key_columns,
            rows: output.rows,
        };
        put_json(self.store.as_ref(), &keys::baseline(&job.job_id), &artifact)?;
        info!(
            "[mos:baseline] job '{}' computed {} statistics over {} rows",
            job.job_id,
            artifact.rows.len(),
            dataset.len()
        );
        self.reporter.report_job(&job.job_id, &JobStatus::running())?;
        Ok(artifact)
    }
}
