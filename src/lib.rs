#![doc = include_str!("../README.md")]

/// Maximum-observed-sensitivity aggregation.
pub mod aggregator;
/// Boundary to the analyst-supplied statistic routine.
pub mod analysis;
/// True-value computation on the unsampled dataset.
pub mod baseline;
/// Epsilon allocation, noise calibration, and carry-forward.
pub mod calibrator;
/// Pipeline configuration.
pub mod config;
/// Centralized constants used across sampling, monitoring, and calibration.
pub mod constants;
/// Table, statistic, and artifact record types.
pub mod data;
/// Reusable CLI runners for the demo binaries.
pub mod example_apps;
mod hash;
/// Capacity extrapolation and row partitioning helpers.
pub mod heuristics;
/// Job, task, and status records.
pub mod job;
/// Release eligibility metrics.
pub mod metrics;
/// Completion and timeout detection.
pub mod monitor;
/// In-process sequencer over every step.
pub mod pipeline;
/// Capacity probe.
pub mod probe;
/// Sampling, sharding, and task dispatch.
pub mod sampler;
/// Leave-one-out local sensitivity.
pub mod sensitivity;
/// Dataset sources.
pub mod source;
/// Artifact store and task queue collaborators.
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Task execution and the worker pool.
pub mod worker;

mod errors;

pub use aggregator::{Aggregator, MosArtifact};
pub use analysis::{AnalysisCatalog, AnalysisRoutine, CommandAnalysis, FnAnalysis};
pub use baseline::{BaselineArtifact, BaselineRunner};
pub use calibrator::{
    EpsilonAllocation, EpsilonEntry, NoiseCalibrator, SanitizedArtifact, Sanitizer,
};
pub use config::PipelineConfig;
pub use data::{
    BaselineRow, Cell, MosRow, PartialResult, PartialResultRow, SanitizedRecord, StatisticKey,
    StatisticRecord, Table,
};
pub use errors::{AnalysisError, PipelineError};
pub use job::{
    Job, JobState, JobStatus, RecordingStatusReporter, StatusReporter, TaskMessage, TaskRange,
    TracingStatusReporter,
};
pub use monitor::{CompletionMonitor, MonitorReport, MonitorState};
pub use pipeline::{JobOutcome, LocalPipeline};
pub use sampler::{DispatchSummary, Dispatcher};
pub use source::{CsvDataset, DatasetCatalog, DatasetSource, InMemoryDataset};
pub use transport::{
    ArtifactStore, FileArtifactStore, InMemoryArtifactStore, InMemoryTaskQueue, TaskQueue,
};
pub use types::{AnalysisId, ArtifactKey, Epsilon, JobId, RunId, StatisticId, TaskId};
pub use worker::{DrainReport, Worker, WorkerPool};
