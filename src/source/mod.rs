//! Confidential dataset sources.
//!
//! A `DatasetSource` yields the full, unsampled table for a dataset id. The
//! sampler draws from it and the baseline runner analyses it directly.

use std::collections::HashMap;
use std::sync::Arc;

use crate::data::Table;
use crate::errors::PipelineError;
use crate::types::DatasetId;

/// Delimited-text dataset loader.
pub mod csv;

pub use csv::CsvDataset;

/// Source of one confidential dataset.
pub trait DatasetSource: Send + Sync {
    /// Stable dataset identifier used in task ids and artifact keys.
    fn id(&self) -> &str;
    /// Load the full table.
    fn load(&self) -> Result<Table, PipelineError>;
}

/// Dataset held in memory.
#[derive(Clone, Debug)]
pub struct InMemoryDataset {
    id: DatasetId,
    table: Table,
}

impl InMemoryDataset {
    pub fn new(id: impl Into<DatasetId>, table: Table) -> Self {
        Self {
            id: id.into(),
            table,
        }
    }
}

impl DatasetSource for InMemoryDataset {
    fn id(&self) -> &str {
        &self.id
    }

    fn load(&self) -> Result<Table, PipelineError> {
        Ok(self.table.clone())
    }
}

/// Datasets addressable by id.
#[derive(Clone, Default)]
pub struct DatasetCatalog {
    datasets: HashMap<DatasetId, Arc<dyn DatasetSource>>,
}

impl DatasetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dataset: Arc<dyn DatasetSource>) {
        self.datasets.insert(dataset.id().to_string(), dataset);
    }

    pub fn with(mut self, dataset: Arc<dyn DatasetSource>) -> Self {
        self.register(dataset);
        self
    }

    pub fn resolve(&self, dataset_id: &str) -> Result<Arc<dyn DatasetSource>, PipelineError> {
        self.datasets
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| PipelineError::DatasetUnavailable {
                dataset_id: dataset_id.to_string(),
                reason: "dataset is not registered".to_string(),
            })
    }
}
