use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::calibration::{
    DEFAULT_MIN_CELL_SIZE, DEFAULT_NOISE_PERCENTILE, DEFAULT_NOISE_PERCENTILE_SAMPLES,
    DEFAULT_TOTAL_EPSILON,
};
use crate::constants::env as env_keys;
use crate::constants::monitor::DEFAULT_JOB_TIMEOUT_SECS;
use crate::constants::sampler::{
    DEFAULT_PROBE_ROWS, DEFAULT_SAMPLE_FRACTION, DEFAULT_SHARD_COUNT,
    DEFAULT_WORKER_TIME_BUDGET_SECS,
};
use crate::errors::PipelineError;

/// Top-level pipeline configuration shared by every component.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Fraction of the full dataset drawn (without replacement) into the sample.
    ///
    /// `1.0` keeps every row and only shuffles the dataset.
    pub sample_fraction: f64,
    /// Number of disjoint subsets (`k`) the sample is split into.
    pub shard_count: usize,
    /// Rows taken out during the capacity probe (`R`).
    pub probe_rows: usize,
    /// Wall-clock budget each task should fit in (`T`).
    pub worker_time_budget: Duration,
    /// Wall-clock limit after which the monitor declares the job timed out.
    pub job_timeout: Duration,
    /// Statistics with `n` below this value are suppressed under the default allocation.
    pub min_cell_size: f64,
    /// Total privacy budget split evenly under the default allocation.
    pub default_total_epsilon: f64,
    /// Percentile of `|omega|` used for the displayed noise estimate.
    pub noise_percentile: f64,
    /// Number of standard-normal draws behind the displayed noise estimate.
    pub noise_percentile_samples: usize,
    /// RNG seed for sampling and noise; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_fraction: DEFAULT_SAMPLE_FRACTION,
            shard_count: DEFAULT_SHARD_COUNT,
            probe_rows: DEFAULT_PROBE_ROWS,
            worker_time_budget: Duration::from_secs(DEFAULT_WORKER_TIME_BUDGET_SECS),
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            min_cell_size: DEFAULT_MIN_CELL_SIZE,
            default_total_epsilon: DEFAULT_TOTAL_EPSILON,
            noise_percentile: DEFAULT_NOISE_PERCENTILE,
            noise_percentile_samples: DEFAULT_NOISE_PERCENTILE_SAMPLES,
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// Validate ranges, returning the config unchanged when every value is usable.
    pub fn validated(self) -> Result<Self, PipelineError> {
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(PipelineError::Configuration(format!(
                "sample_fraction must be in (0, 1], got {}",
                self.sample_fraction
            )));
        }
        if self.shard_count == 0 {
            return Err(PipelineError::Configuration(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if self.probe_rows == 0 {
            return Err(PipelineError::Configuration(
                "probe_rows must be at least 1".to_string(),
            ));
        }
        if self.worker_time_budget.is_zero() {
            return Err(PipelineError::Configuration(
                "worker_time_budget must be non-zero".to_string(),
            ));
        }
        if !(self.default_total_epsilon.is_finite() && self.default_total_epsilon > 0.0) {
            return Err(PipelineError::Configuration(format!(
                "default_total_epsilon must be positive, got {}",
                self.default_total_epsilon
            )));
        }
        if !(0.0..=100.0).contains(&self.noise_percentile) {
            return Err(PipelineError::Configuration(format!(
                "noise_percentile must be in [0, 100], got {}",
                self.noise_percentile
            )));
        }
        if self.noise_percentile_samples == 0 {
            return Err(PipelineError::Configuration(
                "noise_percentile_samples must be at least 1".to_string(),
            ));
        }
        if !self.min_cell_size.is_finite() {
            return Err(PipelineError::Configuration(
                "min_cell_size must be finite".to_string(),
            ));
        }
        Ok(self)
    }

    /// Apply `MOS_*` environment overrides on top of the current values.
    pub fn with_env_overrides(mut self) -> Result<Self, PipelineError> {
        if let Some(fraction) = parse_env::<f64>(env_keys::SAMPLE_FRACTION)? {
            self.sample_fraction = fraction;
        }
        if let Some(shards) = parse_env::<usize>(env_keys::SHARD_COUNT)? {
            self.shard_count = shards;
        }
        if let Some(secs) = parse_env::<u64>(env_keys::JOB_TIMEOUT_SECS)? {
            self.job_timeout = Duration::from_secs(secs);
        }
        if let Some(seed) = parse_env::<u64>(env_keys::SEED)? {
            self.seed = Some(seed);
        }
        Ok(self)
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|err| {
            PipelineError::Configuration(format!("invalid value '{raw}' for {key}: {err}"))
        }),
        Err(_) => Ok(None),
    }
}
