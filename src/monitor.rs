use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::sampler::DispatchSummary;
use crate::transport::{ArtifactStore, keys};

/// Monitor verdict for one poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Running,
    Completed,
    TimedOut,
}

/// Snapshot returned by `CompletionMonitor::poll`.
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorReport {
    pub job_id: String,
    pub state: MonitorState,
    pub num_dispatched: usize,
    pub num_completed: usize,
    pub elapsed: Duration,
}

impl MonitorReport {
    /// Tasks still outstanding; zero once more artifacts exist than were dispatched.
    pub fn num_remaining(&self) -> usize {
        self.num_dispatched.saturating_sub(self.num_completed)
    }

    /// `Ok(true)` once completed, `Ok(false)` while running, `JobTimeout` when timed out.
    pub fn into_result(self, timeout_secs: u64) -> Result<bool, PipelineError> {
        match self.state {
            MonitorState::Completed => Ok(true),
            MonitorState::Running => Ok(false),
            MonitorState::TimedOut => Err(PipelineError::JobTimeout {
                job_id: self.job_id,
                elapsed_secs: self.elapsed.as_secs_f64(),
                timeout_secs,
            }),
        }
    }
}

/// Pure transition: completion is checked before the timeout.
pub fn evaluate(
    num_dispatched: usize,
    num_completed: usize,
    elapsed: Duration,
    timeout: Duration,
) -> MonitorState {
    let remaining = num_dispatched as i64 - num_completed as i64;
    if remaining <= 0 {
        MonitorState::Completed
    } else if elapsed > timeout {
        MonitorState::TimedOut
    } else {
        MonitorState::Running
    }
}

/// Counts partial-result artifacts for a dispatched job.
///
/// Stateless between polls; the caller owns the poll cadence.
#[derive(Clone)]
pub struct CompletionMonitor {
    store: Arc<dyn ArtifactStore>,
}

impl CompletionMonitor {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub fn poll(
        &self,
        summary: &DispatchSummary,
        now: DateTime<Utc>,
    ) -> Result<MonitorReport, PipelineError> {
        let num_completed = self
            .store
            .count(&keys::partial_results_prefix(&summary.job_id))?;
        // Clock skew can put `now` before the start; treat that as no time elapsed.
        let elapsed = (now - summary.start_time).to_std().unwrap_or(Duration::ZERO);
        let state = evaluate(
            summary.num_tasks_dispatched,
            num_completed,
            elapsed,
            Duration::from_secs(summary.job_timeout_secs),
        );
        let report = MonitorReport {
            job_id: summary.job_id.clone(),
            state,
            num_dispatched: summary.num_tasks_dispatched,
            num_completed,
            elapsed,
        };
        match state {
            MonitorState::Running => debug!(
                "[mos:monitor] job '{}' {} of {} tasks remaining after {:.1}s",
                report.job_id,
                report.num_remaining(),
                report.num_dispatched,
                elapsed.as_secs_f64()
            ),
            MonitorState::Completed => info!(
                "[mos:monitor] job '{}' completed ({} artifacts)",
                report.job_id, num_completed
            ),
            MonitorState::TimedOut => warn!(
                "[mos:monitor] job '{}' timed out with {} of {} tasks missing",
                report.job_id,
                report.num_remaining(),
                report.num_dispatched
            ),
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryArtifactStore;

    fn summary(dispatched: usize, timeout_secs: u64, start_time: DateTime<Utc>) -> DispatchSummary {
        DispatchSummary {
            job_id: "7".into(),
            num_tasks_dispatched: dispatched,
            workers_per_shard: 1,
            rows_per_worker: None,
            start_time,
            job_timeout_secs: timeout_secs,
        }
    }

    fn store_with(artifacts: usize) -> Arc<InMemoryArtifactStore> {
        let store = Arc::new(InMemoryArtifactStore::new());
        for idx in 0..artifacts {
            store
                .put(&keys::partial_result("7", &format!("t{idx}")), b"{}")
                .unwrap();
        }
        store.put(&keys::partial_result("70", "other"), b"{}").unwrap();
        store
    }

    #[test]
    fn transitions_follow_counts_then_clock() {
        let timeout = Duration::from_secs(60);
        assert_eq!(
            evaluate(10, 10, Duration::from_secs(5), timeout),
            MonitorState::Completed
        );
        assert_eq!(
            evaluate(10, 7, Duration::from_secs(5), timeout),
            MonitorState::Running
        );
        assert_eq!(
            evaluate(10, 7, Duration::from_secs(61), timeout),
            MonitorState::TimedOut
        );
        assert_eq!(
            evaluate(10, 12, Duration::from_secs(600), timeout),
            MonitorState::Completed
        );
    }

    #[test]
    fn poll_counts_only_this_jobs_artifacts() {
        let start = Utc::now();
        let monitor = CompletionMonitor::new(store_with(7));

        let running = monitor
            .poll(&summary(10, 60, start), start + chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(running.state, MonitorState::Running);
        assert_eq!(running.num_completed, 7);
        assert_eq!(running.num_remaining(), 3);
        assert!(!running.clone().into_result(60).unwrap());

        let timed_out = monitor
            .poll(&summary(10, 60, start), start + chrono::Duration::seconds(61))
            .unwrap();
        assert!(matches!(
            timed_out.into_result(60),
            Err(PipelineError::JobTimeout { .. })
        ));

        let done = monitor
            .poll(&summary(7, 60, start), start + chrono::Duration::seconds(61))
            .unwrap();
        assert_eq!(done.state, MonitorState::Completed);
    }
}
