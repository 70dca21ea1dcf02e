use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use crate::aggregator::{Aggregator, MosArtifact};
use crate::analysis::AnalysisCatalog;
use crate::baseline::BaselineRunner;
use crate::calibrator::{EpsilonAllocation, SanitizedArtifact, Sanitizer};
use crate::config::PipelineConfig;
use crate::constants::monitor::DEFAULT_POLL_INTERVAL_MILLIS;
use crate::errors::PipelineError;
use crate::job::{Job, JobState, JobStatus, StatusReporter, TracingStatusReporter};
use crate::monitor::{CompletionMonitor, MonitorState};
use crate::sampler::{DispatchSummary, Dispatcher};
use crate::source::DatasetCatalog;
use crate::transport::{ArtifactStore, TaskQueue};
use crate::types::RunId;
use crate::worker::{DrainReport, Worker, WorkerPool};

/// Result of a job that ran to completion.
#[derive(Clone, Debug)]
pub struct JobOutcome {
    pub state: JobState,
    pub dispatch: DispatchSummary,
    /// Sum over every drain of the queue.
    pub drain: DrainReport,
    pub mos: MosArtifact,
    pub sanitized: SanitizedArtifact,
}

/// In-process sequencer: baseline, dispatch, workers, monitor, aggregation,
/// then a first sanitization run with the default allocation.
///
/// Each step only starts once the previous one finished; the monitor's
/// `completed` verdict is the only gate into aggregation.
pub struct LocalPipeline {
    store: Arc<dyn ArtifactStore>,
    queue: Arc<dyn TaskQueue>,
    routines: AnalysisCatalog,
    datasets: DatasetCatalog,
    reporter: Arc<dyn StatusReporter>,
    config: PipelineConfig,
    /// Rayon threads per drain; 0 means one per core.
    worker_threads: usize,
    poll_interval: Duration,
}

impl LocalPipeline {
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
            reporter: Arc::new(TracingStatusReporter),
            config,
            worker_threads: 0,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MILLIS),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every step of `job` and its first sanitization run.
    ///
    /// Failures are reported to the status collaborator before being returned.
    pub fn run_job(&self, job: &Job) -> Result<JobOutcome, PipelineError> {
        let mut state = JobState::Submitted;
        match self.run_steps(job, &mut state) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let terminal = if matches!(err, PipelineError::JobTimeout { .. }) {
                    JobState::TimedOut
                } else {
                    JobState::Failed
                };
                if let Ok(next) = state.transition(terminal) {
                    state = next;
                }
                error!(
                    "[mos:pipeline] job '{}' ended {:?}: {err}",
                    job.job_id, state
                );
                self.reporter
                    .report_job(&job.job_id, &JobStatus::failed(&err))?;
                Err(err)
            }
        }
    }

    fn run_steps(&self, job: &Job, state: &mut JobState) -> Result<JobOutcome, PipelineError> {
        BaselineRunner::new(
            self.store.clone(),
            self.routines.clone(),
            self.datasets.clone(),
            self.reporter.clone(),
        )
        .run(job)?;

        let dispatch = Dispatcher::new(
            self.store.clone(),
            self.queue.clone(),
            self.routines.clone(),
            self.datasets.clone(),
            self.config.clone(),
        )
        .dispatch(job)?;
        *state = state.transition(JobState::Dispatched)?;

        *state = state.transition(JobState::Computing)?;
        let pool = WorkerPool::new(
            Worker::new(self.store.clone(), self.routines.clone()),
            self.queue.clone(),
            self.worker_threads,
        );
        let monitor = CompletionMonitor::new(self.store.clone());
        let mut drain = DrainReport::default();
        loop {
            let report = pool.drain()?;
            drain.received += report.received;
            drain.succeeded += report.succeeded;
            drain.dropped += report.dropped;

            let verdict = monitor.poll(&dispatch, Utc::now())?;
            if verdict.state == MonitorState::Completed {
                break;
            }
            // Running re-polls; timed out surfaces as JobTimeout.
            verdict.into_result(dispatch.job_timeout_secs)?;
            thread::sleep(self.poll_interval);
        }

        let mos = Aggregator::new(self.store.clone(), self.config.min_cell_size)
            .aggregate(&job.job_id)?;
        *state = state.transition(JobState::Aggregated)?;

        let sanitized = self.sanitizer().run(
            &job.job_id,
            job.run_id,
            &EpsilonAllocation::uniform(),
        )?;
        *state = state.transition(JobState::Sanitized)?;
        *state = state.transition(JobState::Completed)?;
        info!(
            "[mos:pipeline] job '{}' completed: {} tasks, {} dropped, {} released",
            job.job_id,
            dispatch.num_tasks_dispatched,
            drain.dropped,
            sanitized.records.len()
        );

        Ok(JobOutcome {
            state: *state,
            dispatch,
            drain,
            mos,
            sanitized,
        })
    }

    /// Follow-up sanitization run against an already aggregated job.
    pub fn sanitize_run(
        &self,
        job_id: &str,
        run_id: RunId,
        allocation: &EpsilonAllocation,
    ) -> Result<SanitizedArtifact, PipelineError> {
        self.sanitizer()
            .run(job_id, run_id, allocation)
            .or_else(|err| {
                error!("[mos:pipeline] job '{job_id}' run {run_id} failed: {err}");
                let status = JobStatus::failed(&err);
                self.reporter.report_job(job_id, &status)?;
                self.reporter.report_run(job_id, run_id, &status)?;
                Err(err)
            })
    }

    fn sanitizer(&self) -> Sanitizer {
        Sanitizer::new(self.store.clone(), self.reporter.clone(), &self.config)
    }
}
