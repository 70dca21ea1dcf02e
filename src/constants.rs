/// Constants used by sampling, sharding, and capacity probing.
pub mod sampler {
    /// Fraction of the full dataset drawn into the sensitivity sample.
    pub const DEFAULT_SAMPLE_FRACTION: f64 = 0.01;
    /// Number of disjoint subsets the sample is split into.
    pub const DEFAULT_SHARD_COUNT: usize = 10;
    /// Rows taken out during the capacity probe.
    pub const DEFAULT_PROBE_ROWS: usize = 20;
    /// Per-worker wall-clock budget in seconds (900s worker limit minus a 180s buffer).
    pub const DEFAULT_WORKER_TIME_BUDGET_SECS: u64 = 720;
    /// Takeout row indices are 1-based and inclusive.
    pub const FIRST_ROW_INDEX: usize = 1;
}

/// Constants used by the completion monitor.
pub mod monitor {
    /// Default wall-clock limit for a job before it is declared timed out.
    pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3600;
    /// Default interval between monitor polls in the local sequencer.
    pub const DEFAULT_POLL_INTERVAL_MILLIS: u64 = 250;
}

/// Constants used by noise calibration and release suppression.
pub mod calibration {
    /// Total privacy budget split across releasable statistics under the default allocation.
    pub const DEFAULT_TOTAL_EPSILON: f64 = 1.0;
    /// Statistics with `n` below this cell size are never released.
    pub const DEFAULT_MIN_CELL_SIZE: f64 = 10.0;
    /// Percentile of `|omega|` reported as the displayed noise magnitude.
    pub const DEFAULT_NOISE_PERCENTILE: f64 = 90.0;
    /// Standard-normal draws used to estimate the displayed noise percentile.
    pub const DEFAULT_NOISE_PERCENTILE_SAMPLES: usize = 100;
    /// Statistic names that are noised as counts (`sqrt(2) * omega / epsilon`).
    pub const COUNT_STATISTIC_NAMES: [&str; 2] = ["n", "nobs"];
}

/// Column names with fixed meaning in analysis output and derived artifacts.
pub mod columns {
    /// Mandatory analysis output column holding the statistic value.
    pub const VALUE: &str = "value";
    /// Mandatory analysis output column holding the observation count.
    pub const N: &str = "n";
    /// Column naming the statistic, used to detect count-type statistics.
    pub const STATISTIC: &str = "statistic";
    /// Column naming the analysis a statistic belongs to.
    pub const ANALYSIS_NAME: &str = "analysis_name";
    /// Column naming the analysis type a statistic belongs to.
    pub const ANALYSIS_TYPE: &str = "analysis_type";
}

/// Artifact key layout inside the job namespace.
pub mod store {
    /// Prefix for persisted sample subsets.
    pub const SUBSETS_PREFIX: &str = "subsets";
    /// Prefix for per-task partial results.
    pub const INTERMEDIATE_PREFIX: &str = "intermediate";
    /// Prefix for per-job submission artifacts (baseline, MOS, sanitized runs).
    pub const SUBMISSIONS_PREFIX: &str = "submissions";
    /// File name of the baseline artifact.
    pub const BASELINE_NAME: &str = "true_output";
    /// File name of the MOS artifact.
    pub const MOS_NAME: &str = "mos_output";
    /// File name stem of sanitized run artifacts.
    pub const SANITIZED_STEM: &str = "sanitized_output";
    /// Subset suffix used for the capacity probe subset.
    pub const PROBE_SUBSET_SUFFIX: &str = "probe";
    /// Extension used for every JSON artifact.
    pub const ARTIFACT_EXTENSION: &str = "json";
    /// Default directory for filesystem-backed stores.
    pub const DEFAULT_STORE_DIR: &str = ".mos_store";
}

/// Status messages reported to the job/run status collaborator.
pub mod status {
    /// Info tag for a job whose baseline has been computed.
    pub const INFO_RUNNING: &str = "running";
    /// Info tag for a successfully sanitized run.
    pub const INFO_COMPLETED: &str = "completed";
    /// Info tag for any failed job or run.
    pub const INFO_FAILED: &str = "failed";
    /// Message shown when the analyst's routine failed. Carries no detail about the data.
    pub const ANALYSIS_FAILURE_MESSAGE: &str = "There was an error in your program. For privacy reasons, we cannot provide additional information. Please revise your program and resubmit.";
    /// Message shown for every other failure.
    pub const UNEXPECTED_FAILURE_MESSAGE: &str = "Encountered unexpected error.";
}

/// Environment variables consulted by `PipelineConfig::with_env_overrides`.
pub mod env {
    /// Overrides `PipelineConfig::sample_fraction`.
    pub const SAMPLE_FRACTION: &str = "MOS_SAMPLE_FRACTION";
    /// Overrides `PipelineConfig::shard_count`.
    pub const SHARD_COUNT: &str = "MOS_SHARD_COUNT";
    /// Overrides `PipelineConfig::job_timeout` (seconds).
    pub const JOB_TIMEOUT_SECS: &str = "MOS_JOB_TIMEOUT_SECS";
    /// Overrides `PipelineConfig::seed`.
    pub const SEED: &str = "MOS_SEED";
}
