//! Job, task, and status records exchanged between pipeline steps.
//!
//! Every payload crossing a step boundary is one of these typed records and is
//! validated on receipt rather than threaded through as loose key/value data.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::constants::sampler::FIRST_ROW_INDEX;
use crate::constants::status::{
    ANALYSIS_FAILURE_MESSAGE, INFO_COMPLETED, INFO_FAILED, INFO_RUNNING,
    UNEXPECTED_FAILURE_MESSAGE,
};
use crate::errors::PipelineError;
use crate::types::{ArtifactKey, DatasetId, JobId, RunId, ScriptRef, TaskId};

/// Job lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    Dispatched,
    Computing,
    Aggregated,
    Sanitized,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut
        )
    }

    /// Move to `next`, rejecting anything but the forward lifecycle or a failure exit.
    pub fn transition(self, next: JobState) -> Result<JobState, PipelineError> {
        use JobState::*;
        let allowed = match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) => true,
            (Submitted, Dispatched)
            | (Dispatched, Computing)
            | (Computing, Aggregated)
            | (Computing, TimedOut)
            | (Aggregated, Sanitized)
            | (Sanitized, Completed) => true,
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(PipelineError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// A submitted job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub run_id: RunId,
    pub dataset_id: DatasetId,
    pub script_ref: ScriptRef,
    pub sample_fraction: f64,
    pub shard_count: usize,
}

impl Job {
    /// Build a job for its first run using the sampling parameters in `config`.
    pub fn new(
        job_id: impl Into<JobId>,
        dataset_id: impl Into<DatasetId>,
        script_ref: impl Into<ScriptRef>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            run_id: 1,
            dataset_id: dataset_id.into(),
            script_ref: script_ref.into(),
            sample_fraction: config.sample_fraction,
            shard_count: config.shard_count,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.job_id.trim().is_empty() {
            return Err(PipelineError::Configuration("job_id must not be empty".into()));
        }
        if self.job_id.contains('/') {
            return Err(PipelineError::Configuration(format!(
                "job_id '{}' must not contain '/'",
                self.job_id
            )));
        }
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(PipelineError::Configuration(format!(
                "job '{}' sample_fraction must be in (0, 1]",
                self.job_id
            )));
        }
        if self.shard_count == 0 {
            return Err(PipelineError::Configuration(format!(
                "job '{}' shard_count must be at least 1",
                self.job_id
            )));
        }
        if self.run_id == 0 {
            return Err(PipelineError::Configuration(format!(
                "job '{}' run ids start at 1",
                self.job_id
            )));
        }
        Ok(())
    }
}

/// One of the `k` disjoint partitions of the sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
    pub index: usize,
    pub rows: usize,
    pub artifact: ArtifactKey,
}

/// Inclusive, 1-based takeout row range `[start, end]` within one subset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRange {
    pub start: usize,
    pub end: usize,
}

impl TaskRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }

    pub fn validate(&self, max_index: usize) -> Result<(), String> {
        if self.start < FIRST_ROW_INDEX || self.end < self.start || self.end > max_index {
            return Err(format!(
                "takeout range [{}, {}] is outside [1, {max_index}]",
                self.start, self.end
            ));
        }
        Ok(())
    }
}

/// Task identity string for `(dataset_id, subset_index, start, end)`.
pub fn task_id(dataset_id: &str, subset_index: usize, range: TaskRange) -> TaskId {
    format!("{dataset_id}_{subset_index}_{}_{}", range.start, range.end)
}

/// Message delivered to a worker. May arrive more than once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub subset_ref: ArtifactKey,
    pub script_ref: ScriptRef,
    pub takeout_start_index: usize,
    pub takeout_end_index: usize,
}

impl TaskMessage {
    pub fn range(&self) -> TaskRange {
        TaskRange::new(self.takeout_start_index, self.takeout_end_index)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |reason: String| PipelineError::WorkerTask {
            job_id: self.job_id.clone(),
            task_id: self.task_id.clone(),
            reason,
        };
        if self.job_id.is_empty() || self.task_id.is_empty() {
            return Err(invalid("task message is missing its identity".into()));
        }
        if self.takeout_start_index < FIRST_ROW_INDEX
            || self.takeout_end_index < self.takeout_start_index
        {
            return Err(invalid(format!(
                "invalid takeout range [{}, {}]",
                self.takeout_start_index, self.takeout_end_index
            )));
        }
        Ok(())
    }
}

/// Status payload accepted by the job/run status collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub ok: bool,
    pub info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errormsg: Option<String>,
}

impl JobStatus {
    pub fn running() -> Self {
        Self {
            ok: true,
            info: INFO_RUNNING.to_string(),
            errormsg: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            ok: true,
            info: INFO_COMPLETED.to_string(),
            errormsg: None,
        }
    }

    /// Failure status; analysis-routine failures never leak their detail.
    pub fn failed(error: &PipelineError) -> Self {
        let message = if error.is_analysis_failure() {
            ANALYSIS_FAILURE_MESSAGE
        } else {
            UNEXPECTED_FAILURE_MESSAGE
        };
        Self {
            ok: false,
            info: INFO_FAILED.to_string(),
            errormsg: Some(message.to_string()),
        }
    }
}

/// Job/run status collaborator.
pub trait StatusReporter: Send + Sync {
    /// Report the status of a whole job.
    fn report_job(&self, job_id: &str, status: &JobStatus) -> Result<(), PipelineError>;
    /// Report the status of one run of a job.
    fn report_run(&self, job_id: &str, run_id: RunId, status: &JobStatus)
    -> Result<(), PipelineError>;
}

/// Reporter that only logs status changes.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingStatusReporter;

impl StatusReporter for TracingStatusReporter {
    fn report_job(&self, job_id: &str, status: &JobStatus) -> Result<(), PipelineError> {
        if status.ok {
            info!("[mos:status] job '{job_id}' {}", status.info);
        } else {
            warn!(
                "[mos:status] job '{job_id}' {}: {}",
                status.info,
                status.errormsg.as_deref().unwrap_or_default()
            );
        }
        Ok(())
    }

    fn report_run(
        &self,
        job_id: &str,
        run_id: RunId,
        status: &JobStatus,
    ) -> Result<(), PipelineError> {
        info!(
            "[mos:status] job '{job_id}' run {run_id} {} (ok={})",
            status.info, status.ok
        );
        Ok(())
    }
}

/// Reporter that keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingStatusReporter {
    reports: Mutex<Vec<(JobId, Option<RunId>, JobStatus)>>,
}

impl RecordingStatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report received so far, in order.
    pub fn reports(&self) -> Vec<(JobId, Option<RunId>, JobStatus)> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(
        &self,
        job_id: &str,
        run_id: Option<RunId>,
        status: &JobStatus,
    ) -> Result<(), PipelineError> {
        self.reports
            .lock()
            .map_err(|_| PipelineError::StatusReport("lock poisoned".into()))?
            .push((job_id.to_string(), run_id, status.clone()));
        Ok(())
    }
}

impl StatusReporter for RecordingStatusReporter {
    fn report_job(&self, job_id: &str, status: &JobStatus) -> Result<(), PipelineError> {
        self.record(job_id, None, status)
    }

    fn report_run(
        &self,
        job_id: &str,
        run_id: RunId,
        status: &JobStatus,
    ) -> Result<(), PipelineError> {
        self.record(job_id, Some(run_id), status)
    }
}
