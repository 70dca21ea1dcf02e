use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, RwLock};

use super::{ArtifactStore, TaskQueue};
use crate::errors::PipelineError;
use crate::job::TaskMessage;
use crate::types::ArtifactKey;

/// Thread-safe in-memory artifact store.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: RwLock<BTreeMap<ArtifactKey, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        self.objects
            .write()
            .map_err(|_| store_poisoned(key))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        let objects = self.objects.read().map_err(|_| store_poisoned(key))?;
        Ok(objects.get(key).cloned())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ArtifactKey>, PipelineError> {
        let objects = self.objects.read().map_err(|_| store_poisoned(prefix))?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

fn store_poisoned(key: &str) -> PipelineError {
    PipelineError::Store {
        key: key.to_string(),
        reason: "lock poisoned".to_string(),
    }
}

fn queue_poisoned() -> PipelineError {
    PipelineError::Queue("lock poisoned".into())
}

/// FIFO task queue with explicit redelivery for at-least-once semantics.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    pending: Mutex<VecDeque<TaskMessage>>,
    delivered: Mutex<Vec<TaskMessage>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting for delivery.
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requeue every message delivered so far, as a transport retry would.
    pub fn redeliver_all(&self) -> Result<usize, PipelineError> {
        let delivered: Vec<TaskMessage> = self
            .delivered
            .lock()
            .map_err(|_| queue_poisoned())?
            .drain(..)
            .collect();
        let count = delivered.len();
        self.pending
            .lock()
            .map_err(|_| queue_poisoned())?
            .extend(delivered);
        Ok(count)
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn send(&self, message: &TaskMessage) -> Result<(), PipelineError> {
        self.pending
            .lock()
            .map_err(|_| queue_poisoned())?
            .push_back(message.clone());
        Ok(())
    }

    fn receive(&self) -> Result<Option<TaskMessage>, PipelineError> {
        let message = self
            .pending
            .lock()
            .map_err(|_| queue_poisoned())?
            .pop_front();
        if let Some(message) = &message {
            self.delivered
                .lock()
                .map_err(|_| queue_poisoned())?
                .push(message.clone());
        }
        Ok(message)
    }
}
