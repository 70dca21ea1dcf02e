use std::error::Error as _;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{error, info};

use crate::analysis::AnalysisCatalog;
use crate::data::{PartialResult, Table};
use crate::errors::PipelineError;
use crate::job::TaskMessage;
use crate::sensitivity::local_sensitivities;
use crate::transport::{ArtifactStore, TaskQueue, keys, put_json, require_json};

/// Executes single tasks. Holds no per-task state, so re-delivery is harmless.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn ArtifactStore>,
    routines: AnalysisCatalog,
}

impl Worker {
    pub fn new(store: Arc<dyn ArtifactStore>, routines: AnalysisCatalog) -> Self {
        Self { store, routines }
    }

    /// Compute and persist the partial result for `message`.
    ///
    /// The artifact key depends only on the task identity; a second execution
    /// replaces the first.
    pub fn handle(&self, message: &TaskMessage) -> Result<PartialResult, PipelineError> {
        message.validate()?;
        let subset: Table = require_json(self.store.as_ref(), &message.subset_ref)?;
        let range = message.range();
        range
            .validate(subset.len())
            .map_err(|reason| PipelineError::WorkerTask {
                job_id: message.job_id.clone(),
                task_id: message.task_id.clone(),
                reason,
            })?;
        let routine = self.routines.resolve(&message.script_ref)?;

        let rows = local_sensitivities(routine.as_ref(), &subset, range)?;
        let result = PartialResult {
            job_id: message.job_id.clone(),
            task_id: message.task_id.clone(),
            rows,
        };
        put_json(
            self.store.as_ref(),
            &keys::partial_result(&message.job_id, &message.task_id),
            &result,
        )?;
        Ok(result)
    }

    /// Run `message`, absorbing any failure.
    ///
    /// Failures are logged and the task is dropped: nothing is written and
    /// nothing is retried. Returns whether a partial result was written.
    pub fn process(&self, message: &TaskMessage) -> bool {
        match self.handle(message) {
            Ok(result) => {
                info!(
                    "[mos:worker] job '{}' task '{}' wrote {} statistics",
                    message.job_id,
                    message.task_id,
                    result.rows.len()
                );
                true
            }
            Err(err) => {
                error!(
                    "[mos:worker] job '{}' task '{}' rows [{}, {}] subset '{}' dropped: {}",
                    message.job_id,
                    message.task_id,
                    message.takeout_start_index,
                    message.takeout_end_index,
                    message.subset_ref,
                    error_chain(&err)
                );
                false
            }
        }
    }
}

fn error_chain(err: &PipelineError) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Outcome of draining the queue once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub received: usize,
    pub succeeded: usize,
    pub dropped: usize,
}

/// Drains a task queue and runs the received tasks in parallel.
pub struct WorkerPool {
    worker: Worker,
    queue: Arc<dyn TaskQueue>,
    threads: usize,
}

impl WorkerPool {
    /// `threads == 0` uses rayon's default of one thread per core.
    pub fn new(worker: Worker, queue: Arc<dyn TaskQueue>, threads: usize) -> Self {
        Self {
            worker,
            queue,
            threads,
        }
    }

    /// Receive every currently queued message and execute them.
    pub fn drain(&self) -> Result<DrainReport, PipelineError> {
        let mut messages = Vec::new();
        while let Some(message) = self.queue.receive()? {
            messages.push(message);
        }
        if messages.is_empty() {
            return Ok(DrainReport::default());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|err| PipelineError::Configuration(format!("worker pool: {err}")))?;
        let succeeded = pool.install(|| {
            messages
                .par_iter()
                .filter(|message| self.worker.process(message))
                .count()
        });
        Ok(DrainReport {
            received: messages.len(),
            succeeded,
            dropped: messages.len() - succeeded,
        })
    }
}
