use std::time::Duration;

use crate::constants::sampler::FIRST_ROW_INDEX;
use crate::job::TaskRange;

/// Per-row cost extrapolated from the capacity probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityEstimate {
    /// Rows actually taken out during the probe.
    pub probed_rows: usize,
    /// Wall-clock time the probe took.
    pub elapsed: Duration,
    /// Rows one worker can take out within the time budget (`T * R / t`).
    pub rows_per_worker: f64,
}

impl CapacityEstimate {
    pub fn from_measurement(budget: Duration, probed_rows: usize, elapsed: Duration) -> Self {
        Self {
            probed_rows,
            elapsed,
            rows_per_worker: rows_per_worker(budget, probed_rows, elapsed),
        }
    }

    /// Workers needed so each covers at most `rows_per_worker` rows of a subset.
    pub fn workers_per_shard(&self, subset_rows: usize) -> usize {
        workers_per_shard(subset_rows, self.rows_per_worker)
    }
}

/// `T * R / t`; unbounded when the probe was too fast to measure.
pub fn rows_per_worker(budget: Duration, probed_rows: usize, elapsed: Duration) -> f64 {
    let elapsed_secs = elapsed.as_secs_f64();
    if elapsed_secs <= 0.0 {
        return f64::INFINITY;
    }
    budget.as_secs_f64() * probed_rows as f64 / elapsed_secs
}

/// `ceil(subset_rows / rows_per_worker)`, never less than one.
pub fn workers_per_shard(subset_rows: usize, rows_per_worker: f64) -> usize {
    if subset_rows == 0 || !rows_per_worker.is_finite() || rows_per_worker <= 0.0 {
        return 1;
    }
    let workers = (subset_rows as f64 / rows_per_worker).ceil();
    (workers as usize).clamp(1, subset_rows)
}

/// Number of rows drawn for a sample of `fraction` of `total` rows.
///
/// Rounds to nearest; a non-empty dataset always yields at least one row.
pub fn sample_size(total: usize, fraction: f64) -> usize {
    if total == 0 {
        return 0;
    }
    let size = (total as f64 * fraction.clamp(0.0, 1.0)).round() as usize;
    size.clamp(1, total)
}

/// Sizes of `k` nearly-equal shards of `total` rows; the first `total % k` get one extra.
pub fn shard_sizes(total: usize, k: usize) -> Vec<usize> {
    if k == 0 {
        return Vec::new();
    }
    let base = total / k;
    let extra = total % k;
    (0..k)
        .map(|idx| if idx < extra { base + 1 } else { base })
        .collect()
}

/// Split `[1, max_index]` into exactly `min(workers, max_index)` contiguous
/// inclusive ranges.
///
/// Range lengths follow `shard_sizes`, so none is longer than
/// `ceil(max_index / workers)` and the result covers every index exactly once.
pub fn partition_ranges(max_index: usize, workers: usize) -> Vec<TaskRange> {
    if max_index == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, max_index);
    let mut start = FIRST_ROW_INDEX;
    shard_sizes(max_index, workers)
        .into_iter()
        .map(|len| {
            let range = TaskRange::new(start, start + len - 1);
            start += len;
            range
        })
        .collect()
}

pub fn format_with_commas(value: u128) -> String {
    let raw = value.to_string();
    let mut grouped_reversed = String::with_capacity(raw.len() + (raw.len() / 3));
    for (idx, ch) in raw.chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            grouped_reversed.push(',');
        }
        grouped_reversed.push(ch);
    }
    grouped_reversed.chars().rev().collect()
}
