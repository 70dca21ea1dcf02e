//! Storage and queue collaborators.
//!
//! Components never reach for process-wide clients: each one is handed an
//! `ArtifactStore` and, where it dispatches work, a `TaskQueue`. Both are
//! small traits so tests can substitute in-memory doubles.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::store::{
    ARTIFACT_EXTENSION, BASELINE_NAME, INTERMEDIATE_PREFIX, MOS_NAME, PROBE_SUBSET_SUFFIX,
    SANITIZED_STEM, SUBMISSIONS_PREFIX, SUBSETS_PREFIX,
};
use crate::errors::PipelineError;
use crate::job::TaskMessage;
use crate::types::{ArtifactKey, RunId};

/// Filesystem-backed artifact store.
pub mod fs;
/// In-memory artifact store and task queue.
pub mod memory;

pub use fs::FileArtifactStore;
pub use memory::{InMemoryArtifactStore, InMemoryTaskQueue};

/// Durable key/value object storage.
///
/// `put` replaces any existing object at `key`; it never appends.
pub trait ArtifactStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError>;
    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<ArtifactKey>, PipelineError>;

    /// Number of objects under `prefix`.
    fn count(&self, prefix: &str) -> Result<usize, PipelineError> {
        Ok(self.list(prefix)?.len())
    }
}

/// At-least-once task transport.
pub trait TaskQueue: Send + Sync {
    fn send(&self, message: &TaskMessage) -> Result<(), PipelineError>;
    /// Next message, or `None` when the queue is currently empty.
    fn receive(&self) -> Result<Option<TaskMessage>, PipelineError>;
}

/// Serialize `value` as JSON and store it at `key`.
pub fn put_json<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &str,
    value: &T,
) -> Result<(), PipelineError> {
    let bytes = serde_json::to_vec(value).map_err(|err| PipelineError::Serialization {
        key: key.to_string(),
        reason: err.to_string(),
    })?;
    store.put(key, &bytes)
}

/// Load and decode the JSON artifact at `key`, if present.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &str,
) -> Result<Option<T>, PipelineError> {
    let Some(bytes) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| PipelineError::Serialization {
            key: key.to_string(),
            reason: err.to_string(),
        })
}

/// Like `get_json`, but a missing artifact is an error.
pub fn require_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &str,
) -> Result<T, PipelineError> {
    get_json(store, key)?.ok_or_else(|| PipelineError::MissingArtifact(key.to_string()))
}

/// Artifact key layout. Every key is namespaced by job id.
pub mod keys {
    use super::*;

    pub fn subset(job_id: &str, dataset_id: &str, subset_index: usize) -> ArtifactKey {
        format!("{SUBSETS_PREFIX}/{job_id}/{dataset_id}_{subset_index}.{ARTIFACT_EXTENSION}")
    }

    pub fn probe_subset(job_id: &str, dataset_id: &str) -> ArtifactKey {
        format!(
            "{SUBSETS_PREFIX}/{job_id}/{dataset_id}_{PROBE_SUBSET_SUFFIX}.{ARTIFACT_EXTENSION}"
        )
    }

    /// Prefix holding every partial result of `job_id`.
    pub fn partial_results_prefix(job_id: &str) -> String {
        format!("{INTERMEDIATE_PREFIX}/{job_id}/")
    }

    pub fn partial_result(job_id: &str, task_id: &str) -> ArtifactKey {
        format!(
            "{}{task_id}.{ARTIFACT_EXTENSION}",
            partial_results_prefix(job_id)
        )
    }

    pub fn baseline(job_id: &str) -> ArtifactKey {
        format!("{SUBMISSIONS_PREFIX}/{job_id}/{BASELINE_NAME}.{ARTIFACT_EXTENSION}")
    }

    pub fn mos(job_id: &str) -> ArtifactKey {
        format!("{SUBMISSIONS_PREFIX}/{job_id}/{MOS_NAME}.{ARTIFACT_EXTENSION}")
    }

    pub fn sanitized(job_id: &str, run_id: RunId) -> ArtifactKey {
        format!("{SUBMISSIONS_PREFIX}/{job_id}/{SANITIZED_STEM}_{run_id}.{ARTIFACT_EXTENSION}")
    }
}
