//! Leave-one-out local sensitivity.
//!
//! The routine runs once on the whole subset, then once per takeout row with
//! that row removed. For every statistic the largest absolute change from the
//! full-subset value is kept. Shared by the worker and the capacity probe.

use indexmap::IndexMap;
use tracing::debug;

use crate::analysis::{AnalysisRoutine, run_analysis};
use crate::data::{PartialResultRow, StatisticKey, Table};
use crate::errors::PipelineError;
use crate::job::TaskRange;

struct RunningMax {
    n: f64,
    value: Option<f64>,
    ls: f64,
}

/// Per-statistic local sensitivity over the takeout rows in `range`.
///
/// Rows come back in the order the full-subset run produced them. A statistic
/// missing from a takeout run, or null in either run, leaves its maximum as is.
pub fn local_sensitivities(
    routine: &dyn AnalysisRoutine,
    subset: &Table,
    range: TaskRange,
) -> Result<Vec<PartialResultRow>, PipelineError> {
    let baseline = run_analysis(routine, subset)?;
    let mut running: IndexMap<StatisticKey, RunningMax> = IndexMap::new();
    for row in baseline.rows {
        running.entry(row.key).or_insert(RunningMax {
            n: row.n,
            value: row.value,
            ls: 0.0,
        });
    }

    for takeout_index in range.indices() {
        let reduced = subset.without_row(takeout_index);
        let output = run_analysis(routine, &reduced)?;
        for row in output.rows {
            let Some(entry) = running.get_mut(&row.key) else {
                continue;
            };
            if let (Some(full), Some(takeout)) = (entry.value, row.value) {
                let change = (full - takeout).abs();
                if change > entry.ls {
                    entry.ls = change;
                }
            }
        }
    }

    debug!(
        "[mos:sensitivity] routine '{}' rows {}..={} -> {} statistics",
        routine.name(),
        range.start,
        range.end,
        running.len()
    );

    Ok(running
        .into_iter()
        .map(|(key, max)| PartialResultRow {
            key,
            n: max.n,
            ls: max.ls,
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::FnAnalysis;
    use crate::data::Cell;
    use crate::errors::AnalysisError;

    /// Mean and count of the `x` column, one row each.
    pub(crate) fn mean_and_count() -> FnAnalysis {
        FnAnalysis::new("mean_and_count", |table: &Table| {
            let idx = table
                .column_index("x")
                .ok_or_else(|| AnalysisError::MissingColumn("x".into()))?;
            let values: Vec<f64> = table.rows.iter().filter_map(|r| r[idx].as_f64()).collect();
            let n = values.len() as f64;
            let mean = if values.is_empty() {
                Cell::Null
            } else {
                Cell::Float(values.iter().sum::<f64>() / n)
            };
            Table::new(
                vec!["statistic".into(), "value".into(), "n".into()],
                vec![
                    vec![Cell::from("mean"), mean, Cell::Float(n)],
                    vec![Cell::from("nobs"), Cell::Float(n), Cell::Float(n)],
                ],
            )
            .map_err(|err| AnalysisError::Failed {
                routine: "mean_and_count".into(),
                reason: err.to_string(),
            })
        })
    }

    pub(crate) fn column_x(values: &[f64]) -> Table {
        Table::new(
            vec!["x".into()],
            values.iter().map(|v| vec![Cell::Float(*v)]).collect(),
        )
        .unwrap()
    }

    fn ls_of<'a>(rows: &'a [PartialResultRow], name: &str) -> &'a PartialResultRow {
        rows.iter()
            .find(|row| row.key.get("statistic") == Some(&Cell::from(name)))
            .unwrap()
    }

    #[test]
    fn keeps_largest_takeout_change_per_statistic() {
        let routine = mean_and_count();
        let subset = column_x(&[1.0, 2.0, 3.0, 10.0]);
        let rows = local_sensitivities(&routine, &subset, TaskRange::new(1, 4)).unwrap();

        // full mean 4.0; dropping 10 gives 2.0, the largest change.
        let mean = ls_of(&rows, "mean");
        assert_eq!(mean.n, 4.0);
        assert!((mean.ls - 2.0).abs() < 1e-12);
        assert!((ls_of(&rows, "nobs").ls - 1.0).abs() < 1e-12);
    }

    #[test]
    fn only_rows_in_range_are_taken_out() {
        let routine = mean_and_count();
        let subset = column_x(&[1.0, 2.0, 3.0, 10.0]);
        let rows = local_sensitivities(&routine, &subset, TaskRange::new(1, 2)).unwrap();
        // dropping 1 -> mean 5.0 (change 1.0); dropping 2 -> 4.666 (change 0.666).
        assert!((ls_of(&rows, "mean").ls - 1.0).abs() < 1e-12);
    }

    #[test]
    fn statistics_missing_from_takeout_runs_are_not_updated() {
        let routine = FnAnalysis::new("flaky", |table: &Table| {
            let mut rows = vec![vec![
                Cell::from("total"),
                Cell::Float(table.len() as f64),
                Cell::Float(table.len() as f64),
            ]];
            if table.len() == 3 {
                rows.push(vec![Cell::from("only_full"), Cell::Float(100.0), Cell::Float(3.0)]);
            }
            Ok(Table::new(vec!["statistic".into(), "value".into(), "n".into()], rows).unwrap())
        });
        let subset = column_x(&[1.0, 2.0, 3.0]);
        let rows = local_sensitivities(&routine, &subset, TaskRange::new(1, 3)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(ls_of(&rows, "only_full").ls, 0.0);
        assert_eq!(ls_of(&rows, "total").ls, 1.0);
    }

    #[test]
    fn routine_failure_propagates() {
        let routine = FnAnalysis::new("broken", |_: &Table| {
            Err(AnalysisError::Failed {
                routine: "broken".into(),
                reason: "boom".into(),
            })
        });
        let err = local_sensitivities(&routine, &column_x(&[1.0]), TaskRange::new(1, 1))
            .unwrap_err();
        assert!(err.is_analysis_failure());
    }
}
