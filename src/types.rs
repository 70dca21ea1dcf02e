/// Identifier of a submitted job; namespaces every artifact it produces.
/// Examples: `1`, `job-2025-03-01-a`
pub type JobId = String;
/// Identifier of one sanitization run within a job (1-based, increasing).
/// Examples: `1`, `2`
pub type RunId = u64;
/// Identifier of the confidential dataset a job analyses.
/// Examples: `cps`, `puf_2012`
pub type DatasetId = String;
/// Reference to the analyst-supplied routine.
/// Examples: `cps-multi`, `./scripts/mean_income.sh`
pub type ScriptRef = String;
/// Task identity derived from `(dataset_id, subset_index, start, end)`.
/// Example: `cps_3_1_250`
pub type TaskId = String;
/// Key of a stored artifact inside an `ArtifactStore`.
/// Example: `intermediate/1/cps_3_1_250.json`
pub type ArtifactKey = String;
/// Dense per-job statistic identifier assigned by the aggregator.
pub type StatisticId = u64;
/// Dense per-job analysis identifier assigned by the aggregator.
pub type AnalysisId = u64;
/// Name of a table column.
/// Examples: `statistic`, `analysis_name`, `value`, `n`
pub type ColumnName = String;
/// Privacy-budget value.
pub type Epsilon = f64;
