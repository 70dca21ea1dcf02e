use std::io;

use thiserror::Error;

use crate::job::JobState;
use crate::types::{ArtifactKey, JobId, TaskId};

/// Failure surface of the analysis-function boundary.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis routine '{routine}' could not be started: {reason}")]
    Spawn { routine: String, reason: String },
    #[error("analysis routine '{routine}' exited with status {status}: {stderr}")]
    Exited {
        routine: String,
        status: String,
        stderr: String,
    },
    #[error("analysis routine '{routine}' produced malformed output: {details}")]
    MalformedOutput { routine: String, details: String },
    #[error("analysis output is missing mandatory column '{0}'")]
    MissingColumn(String),
    #[error("analysis routine '{routine}' failed: {reason}")]
    Failed { routine: String, reason: String },
}

/// Error type for dispatch, worker, monitoring, aggregation, and calibration failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("dispatch failed for job '{job_id}': {source}")]
    Dispatch {
        job_id: JobId,
        #[source]
        source: Box<PipelineError>,
    },
    #[error("task '{task_id}' of job '{job_id}' failed: {reason}")]
    WorkerTask {
        job_id: JobId,
        task_id: TaskId,
        reason: String,
    },
    #[error("job '{job_id}' timed out after {elapsed_secs:.1}s (limit {timeout_secs}s)")]
    JobTimeout {
        job_id: JobId,
        elapsed_secs: f64,
        timeout_secs: u64,
    },
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("artifact store failure at '{key}': {reason}")]
    Store { key: ArtifactKey, reason: String },
    #[error("artifact '{0}' not found")]
    MissingArtifact(ArtifactKey),
    #[error("task queue failure: {0}")]
    Queue(String),
    #[error("status reporting failed: {0}")]
    StatusReport(String),
    #[error("failed to encode or decode '{key}': {reason}")]
    Serialization { key: ArtifactKey, reason: String },
    #[error("dataset '{dataset_id}' is unavailable: {reason}")]
    DatasetUnavailable { dataset_id: String, reason: String },
    #[error("invalid job transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobState, to: JobState },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    /// Wrap `source` as a fatal, pre-dispatch failure of `job_id`.
    pub fn dispatch(job_id: impl Into<JobId>, source: PipelineError) -> Self {
        PipelineError::Dispatch {
            job_id: job_id.into(),
            source: Box::new(source),
        }
    }

    /// True when the failure originated in the analyst-supplied routine.
    pub fn is_analysis_failure(&self) -> bool {
        match self {
            PipelineError::Analysis(_) => true,
            PipelineError::Dispatch { source, .. } => source.is_analysis_failure(),
            _ => false,
        }
    }
}
