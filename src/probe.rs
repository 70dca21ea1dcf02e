use std::time::{Duration, Instant};

use rand::Rng;
use tracing::info;

use crate::analysis::AnalysisRoutine;
use crate::constants::sampler::FIRST_ROW_INDEX;
use crate::data::Table;
use crate::errors::PipelineError;
use crate::heuristics::CapacityEstimate;
use crate::job::TaskRange;
use crate::sensitivity::local_sensitivities;

/// Times a short leave-one-out run to size tasks against the worker budget.
#[derive(Clone, Copy, Debug)]
pub struct CapacityProbe {
    budget: Duration,
    probe_rows: usize,
}

impl CapacityProbe {
    pub fn new(budget: Duration, probe_rows: usize) -> Self {
        Self { budget, probe_rows }
    }

    /// Take out the first `min(R, len)` rows of `aux` and extrapolate the timing.
    pub fn measure(
        &self,
        routine: &dyn AnalysisRoutine,
        aux: &Table,
    ) -> Result<CapacityEstimate, PipelineError> {
        let rows = self.probe_rows.min(aux.len());
        if rows == 0 {
            return Err(PipelineError::Configuration(
                "capacity probe needs at least one row".to_string(),
            ));
        }
        let started = Instant::now();
        local_sensitivities(routine, aux, TaskRange::new(FIRST_ROW_INDEX, rows))?;
        let elapsed = started.elapsed();

        let estimate = CapacityEstimate::from_measurement(self.budget, rows, elapsed);
        info!(
            "[mos:probe] {} takeout rows in {:.3}s -> {:.1} rows per worker",
            rows,
            elapsed.as_secs_f64(),
            estimate.rows_per_worker
        );
        Ok(estimate)
    }
}

/// Auxiliary probe subset: `ceil(len / k)` rows drawn from `sample` without replacement.
pub fn draw_probe_subset<R: Rng + ?Sized>(sample: &Table, shard_count: usize, rng: &mut R) -> Table {
    let size = sample.len().div_ceil(shard_count.max(1));
    let positions = rand::seq::index::sample(rng, sample.len(), size).into_vec();
    sample.select_rows(&positions)
}
