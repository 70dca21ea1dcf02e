//! Noise calibration and run-over-run carry-forward.
//!
//! A run turns the job's MOS artifact plus an epsilon allocation into a
//! sanitized release. Count statistics (`n`, `nobs`) are noised as
//! `sqrt(2) * omega / epsilon`; every other statistic as
//! `sqrt(2) * chi / (epsilon * n) * omega`, with `omega` standard normal.
//!
//! On a follow-up run with user epsilons, statistics not named in the update
//! list keep the previous run's sanitized value unchanged.

use std::collections::{HashMap, HashSet};
use std::f64::consts::SQRT_2;
use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregator::MosArtifact;
use crate::config::PipelineConfig;
use crate::constants::calibration::COUNT_STATISTIC_NAMES;
use crate::data::{SanitizedRecord, StatisticRecord};
use crate::errors::PipelineError;
use crate::hash::job_rng;
use crate::job::{JobStatus, StatusReporter};
use crate::transport::{ArtifactStore, keys, put_json, require_json};
use crate::types::{Epsilon, JobId, RunId, StatisticId};

/// One user-supplied budget entry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpsilonEntry {
    pub statistic_id: StatisticId,
    pub epsilon: Epsilon,
}

/// Budget allocation for one sanitization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpsilonAllocation {
    pub use_default_epsilon: bool,
    #[serde(default)]
    pub epsilons: Vec<EpsilonEntry>,
}

impl EpsilonAllocation {
    /// Total budget split evenly over the releasable statistics.
    pub fn uniform() -> Self {
        Self {
            use_default_epsilon: true,
            epsilons: Vec::new(),
        }
    }

    pub fn user(epsilons: Vec<EpsilonEntry>) -> Self {
        Self {
            use_default_epsilon: false,
            epsilons,
        }
    }

    pub fn updated_ids(&self) -> HashSet<StatisticId> {
        self.epsilons.iter().map(|entry| entry.statistic_id).collect()
    }
}

/// Sanitized release of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SanitizedArtifact {
    pub job_id: JobId,
    pub run_id: RunId,
    /// Sorted by `statistic_id`.
    pub records: Vec<SanitizedRecord>,
}

/// True for statistics noised with the count formula.
pub fn is_count_statistic(record: &StatisticRecord) -> bool {
    record
        .statistic_name()
        .is_some_and(|name| COUNT_STATISTIC_NAMES.contains(&name))
}

/// `p`-th percentile (0..=100) with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Pairs each releasable record with its epsilon.
///
/// The default budget is split over every statistic that meets the cell
/// size, including those later withheld for a missing value or chi.
/// Statistics below the cell size, without a value, or without chi never get
/// a budget. Under a user allocation, entries and records without a
/// counterpart are dropped, as are non-positive epsilons.
pub fn allocate<'a>(
    records: &'a [StatisticRecord],
    allocation: &EpsilonAllocation,
    min_cell_size: f64,
    total_epsilon: Epsilon,
) -> Vec<(&'a StatisticRecord, Epsilon)> {
    let releasable = records
        .iter()
        .filter(|record| record.is_releasable(min_cell_size));
    if allocation.use_default_epsilon {
        let surviving = records
            .iter()
            .filter(|record| record.meets_cell_size(min_cell_size))
            .count();
        if surviving == 0 {
            return Vec::new();
        }
        let epsilon = total_epsilon / surviving as f64;
        return releasable.map(|record| (record, epsilon)).collect();
    }

    let mut requested: HashMap<StatisticId, Epsilon> = HashMap::new();
    for entry in &allocation.epsilons {
        requested.entry(entry.statistic_id).or_insert(entry.epsilon);
    }
    releasable
        .filter_map(|record| {
            let epsilon = *requested.get(&record.statistic_id)?;
            (epsilon.is_finite() && epsilon > 0.0).then_some((record, epsilon))
        })
        .collect()
}

/// Computes noisy values for allocated statistics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseCalibrator {
    pub min_cell_size: f64,
    pub total_epsilon: Epsilon,
    pub noise_percentile: f64,
    pub noise_percentile_samples: usize,
}

impl NoiseCalibrator {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min_cell_size: config.min_cell_size,
            total_epsilon: config.default_total_epsilon,
            noise_percentile: config.noise_percentile,
            noise_percentile_samples: config.noise_percentile_samples,
        }
    }

    /// Sanitize every record `allocation` assigns a budget to.
    ///
    /// One `omega` is drawn per statistic; the displayed percentile uses one
    /// independent sample shared by the whole run.
    pub fn calibrate<R: Rng + ?Sized>(
        &self,
        records: &[StatisticRecord],
        allocation: &EpsilonAllocation,
        run_id: RunId,
        rng: &mut R,
    ) -> Vec<SanitizedRecord> {
        let allocated = allocate(records, allocation, self.min_cell_size, self.total_epsilon);

        let magnitudes: Vec<f64> = (0..self.noise_percentile_samples)
            .map(|_| {
                let draw: f64 = StandardNormal.sample(rng);
                draw.abs()
            })
            .collect();
        let omega_percentile = percentile(&magnitudes, self.noise_percentile).unwrap_or(0.0);

        allocated
            .into_iter()
            .filter_map(|(record, epsilon)| {
                let (value, chi) = (record.value?, record.chi?);
                let omega: f64 = StandardNormal.sample(rng);
                let noise = if is_count_statistic(record) {
                    SQRT_2 * omega / epsilon
                } else {
                    SQRT_2 * (chi / (epsilon * record.n)) * omega
                };
                Some(SanitizedRecord {
                    statistic_id: record.statistic_id,
                    analysis_id: record.analysis_id,
                    key: record.key.clone(),
                    epsilon,
                    value_sanitized: value + noise,
                    noise_percentile: omega_percentile * SQRT_2 * chi / record.n,
                    run_id,
                })
            })
            .collect()
    }
}

/// Union of `recomputed` with every `prior` record whose id was not updated, sorted by id.
pub fn carry_forward(
    recomputed: Vec<SanitizedRecord>,
    prior: &[SanitizedRecord],
    updated_ids: &HashSet<StatisticId>,
) -> Vec<SanitizedRecord> {
    let mut merged: Vec<SanitizedRecord> = prior
        .iter()
        .filter(|record| !updated_ids.contains(&record.statistic_id))
        .cloned()
        .chain(recomputed)
        .collect();
    merged.sort_by_key(|record| record.statistic_id);
    merged
}

/// Runs one sanitization against stored artifacts and reports its status.
pub struct Sanitizer {
    store: Arc<dyn ArtifactStore>,
    reporter: Arc<dyn StatusReporter>,
    calibrator: NoiseCalibrator,
    seed: Option<u64>,
}

impl Sanitizer {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        reporter: Arc<dyn StatusReporter>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            reporter,
            calibrator: NoiseCalibrator::from_config(config),
            seed: config.seed,
        }
    }

    /// Sanitize run `run_id` of `job_id` and store `sanitized_output_{run_id}`.
    ///
    /// A user allocation on a run after the first carries forward from run
    /// `run_id - 1`, which must exist.
    pub fn run(
        &self,
        job_id: &str,
        run_id: RunId,
        allocation: &EpsilonAllocation,
    ) -> Result<SanitizedArtifact, PipelineError> {
        if run_id == 0 {
            return Err(PipelineError::Configuration(
                "run ids start at 1".to_string(),
            ));
        }
        let store = self.store.as_ref();
        let mos: MosArtifact = require_json(store, &keys::mos(job_id))?;
        let mut rng = job_rng(self.seed, job_id, &format!("noise_{run_id}"));
        let recomputed = self
            .calibrator
            .calibrate(&mos.records, allocation, run_id, &mut rng);
        let recomputed_count = recomputed.len();

        let records = if !allocation.use_default_epsilon && run_id > 1 {
            let prior: SanitizedArtifact = require_json(store, &keys::sanitized(job_id, run_id - 1))?;
            carry_forward(recomputed, &prior.records, &allocation.updated_ids())
        } else {
            let mut records = recomputed;
            records.sort_by_key(|record| record.statistic_id);
            records
        };
        debug!(
            "[mos:sanitize] job '{job_id}' run {run_id}: {recomputed_count} recomputed, {} carried forward",
            records.len() - recomputed_count
        );

        let artifact = SanitizedArtifact {
            job_id: job_id.to_string(),
            run_id,
            records,
        };
        put_json(store, &keys::sanitized(job_id, run_id), &artifact)?;
        info!(
            "[mos:sanitize] job '{job_id}' run {run_id} released {} of {} statistics",
            artifact.records.len(),
            mos.records.len()
        );
        let status = JobStatus::completed();
        self.reporter.report_job(job_id, &status)?;
        self.reporter.report_run(job_id, run_id, &status)?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cell, StatisticKey};
    use crate::job::RecordingStatusReporter;
    use crate::transport::InMemoryArtifactStore;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn record(id: StatisticId, name: &str, n: f64, chi: Option<f64>) -> StatisticRecord {
        StatisticRecord {
            statistic_id: id,
            analysis_id: 0,
            key: StatisticKey::new(vec![("statistic".into(), Cell::from(name))]),
            value: Some(100.0),
            n,
            chi,
        }
    }

    fn calibrator() -> NoiseCalibrator {
        NoiseCalibrator::from_config(&PipelineConfig::default())
    }

    #[test]
    fn default_allocation_splits_budget_over_releasable() {
        let records = vec![
            record(0, "mean", 50.0, Some(1.0)),
            record(1, "mean", 5.0, Some(1.0)),
            record(2, "mean", 20.0, Some(1.0)),
            record(3, "mean", 9.0, Some(1.0)),
            record(4, "mean", 10.0, Some(1.0)),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let out = calibrator().calibrate(&records, &EpsilonAllocation::uniform(), 1, &mut rng);

        assert_eq!(
            out.iter().map(|r| r.statistic_id).collect::<Vec<_>>(),
            vec![0, 2, 4]
        );
        for released in &out {
            assert!((released.epsilon - 1.0 / 3.0).abs() < 1e-12);
            assert_eq!(released.run_id, 1);
        }
    }

    #[test]
    fn missing_chi_is_never_released_but_still_shares_the_budget() {
        let records = vec![
            record(0, "mean", 50.0, None),
            record(1, "mean", 50.0, Some(2.0)),
            record(2, "mean", 50.0, Some(3.0)),
        ];
        let allocated = allocate(&records, &EpsilonAllocation::uniform(), 10.0, 1.0);
        assert_eq!(
            allocated.iter().map(|(r, _)| r.statistic_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        for (_, epsilon) in &allocated {
            assert!((epsilon - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn user_allocation_is_an_inner_join() {
        let records = vec![
            record(0, "mean", 50.0, Some(1.0)),
            record(1, "mean", 50.0, Some(1.0)),
            record(2, "mean", 5.0, Some(1.0)),
        ];
        let allocation = EpsilonAllocation::user(vec![
            EpsilonEntry {
                statistic_id: 1,
                epsilon: 0.5,
            },
            EpsilonEntry {
                statistic_id: 2,
                epsilon: 0.5,
            },
            EpsilonEntry {
                statistic_id: 99,
                epsilon: 0.5,
            },
        ]);
        let allocated = allocate(&records, &allocation, 10.0, 1.0);
        assert_eq!(allocated.len(), 1);
        assert_eq!(allocated[0].0.statistic_id, 1);
    }

    #[test]
    fn formula_is_chosen_by_statistic_name() {
        let records = vec![
            record(0, "nobs", 50.0, Some(1_000_000.0)),
            record(1, "n", 50.0, Some(1_000_000.0)),
            record(2, "mean", 50.0, Some(1_000_000.0)),
        ];
        let allocation = EpsilonAllocation::user(
            (0..3)
                .map(|statistic_id| EpsilonEntry {
                    statistic_id,
                    epsilon: 1.0,
                })
                .collect(),
        );
        let sanitized = calibrator().calibrate(&records, &allocation, 1, &mut StdRng::seed_from_u64(4));

        // Replay the draws: one percentile sample, then one omega per statistic.
        let mut replay = StdRng::seed_from_u64(4);
        for _ in 0..calibrator().noise_percentile_samples {
            let _: f64 = StandardNormal.sample(&mut replay);
        }
        let omegas: Vec<f64> = (0..3).map(|_| StandardNormal.sample(&mut replay)).collect();

        let expected_count = |omega: f64| 100.0 + SQRT_2 * omega;
        let expected_scaled = |omega: f64| 100.0 + SQRT_2 * (1_000_000.0 / 50.0) * omega;
        assert!((sanitized[0].value_sanitized - expected_count(omegas[0])).abs() < 1e-9);
        assert!((sanitized[1].value_sanitized - expected_count(omegas[1])).abs() < 1e-9);
        assert!((sanitized[2].value_sanitized - expected_scaled(omegas[2])).abs() < 1e-6);
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 50.0), Some(3.0));
        assert_eq!(percentile(&values, 100.0), Some(5.0));
        assert!((percentile(&values, 90.0).unwrap() - 4.6).abs() < 1e-12);
        assert_eq!(percentile(&[], 90.0), None);
    }

    #[test]
    fn carry_forward_reuses_prior_values() {
        let sanitized = |id: StatisticId, value: f64, run_id: RunId| SanitizedRecord {
            statistic_id: id,
            analysis_id: 0,
            key: StatisticKey::default(),
            epsilon: 0.1,
            value_sanitized: value,
            noise_percentile: 0.0,
            run_id,
        };
        let prior = vec![
            sanitized(1, 10.0, 1),
            sanitized(2, 20.0, 1),
            sanitized(3, 30.0, 1),
        ];
        let recomputed = vec![sanitized(2, 21.0, 2)];
        let merged = carry_forward(recomputed, &prior, &HashSet::from([2]));
        assert_eq!(
            merged,
            vec![sanitized(1, 10.0, 1), sanitized(2, 21.0, 2), sanitized(3, 30.0, 1)]
        );
    }

    #[test]
    fn sanitizer_carries_forward_between_runs() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let reporter = Arc::new(RecordingStatusReporter::new());
        put_json(
            store.as_ref(),
            &keys::mos("j"),
            &MosArtifact {
                job_id: "j".into(),
                records: (1..=3)
                    .map(|id| record(id, "mean", 50.0, Some(2.0)))
                    .collect(),
            },
        )
        .unwrap();
        let config = PipelineConfig {
            seed: Some(3),
            ..PipelineConfig::default()
        };
        let sanitizer = Sanitizer::new(store.clone(), reporter.clone(), &config);

        let first = sanitizer.run("j", 1, &EpsilonAllocation::uniform()).unwrap();
        assert_eq!(first.records.len(), 3);

        let second = sanitizer
            .run(
                "j",
                2,
                &EpsilonAllocation::user(vec![EpsilonEntry {
                    statistic_id: 2,
                    epsilon: 5.0,
                }]),
            )
            .unwrap();
        assert_eq!(
            second.records.iter().map(|r| r.statistic_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(second.records[0], first.records[0]);
        assert_eq!(second.records[2], first.records[2]);
        assert_eq!(second.records[1].run_id, 2);
        assert_eq!(second.records[1].epsilon, 5.0);

        let reports = reporter.reports();
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[3], ("j".to_string(), Some(2), JobStatus::completed()));

        assert!(matches!(
            sanitizer.run("j", 5, &EpsilonAllocation::user(Vec::new())),
            Err(PipelineError::MissingArtifact(_))
        ));
    }
}
