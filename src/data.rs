use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::types::{AnalysisId, ColumnName, Epsilon, RunId, StatisticId};

/// A single table cell.
///
/// Floats compare and hash by bit pattern so cells can key identity maps.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Numeric view of the cell; `None` for null and text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(value) => Some(*value as f64),
            Cell::Float(value) if !value.is_nan() => Some(*value),
            _ => None,
        }
    }

    /// Text view of the cell; `None` unless it holds text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Parse a raw text field: empty -> null, then integer, then float, else text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") {
            return Cell::Null;
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return Cell::Int(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return Cell::Float(value);
        }
        Cell::Text(trimmed.to_string())
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::Float(a), Cell::Float(b)) => a.to_bits() == b.to_bits(),
            (Cell::Text(a), Cell::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Cell {}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Cell::Null => {}
            Cell::Int(value) => value.hash(state),
            Cell::Float(value) => value.to_bits().hash(state),
            Cell::Text(value) => value.hash(state),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Int(value) => write!(f, "{value}"),
            Cell::Float(value) => write!(f, "{value}"),
            Cell::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

/// Row-major table exchanged with the analysis routine and stored as subsets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<ColumnName>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Build a table, rejecting rows whose width differs from the header.
    pub fn new(columns: Vec<ColumnName>, rows: Vec<Vec<Cell>>) -> Result<Self, PipelineError> {
        let table = Self { columns, rows };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let width = self.columns.len();
        if let Some((idx, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != width)
        {
            return Err(PipelineError::Configuration(format!(
                "row {} has {} cells but the header has {width} columns",
                idx + 1,
                row.len()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Copy of this table without the 1-based row `index`.
    ///
    /// Out-of-range indices return an unchanged copy.
    pub fn without_row(&self, index: usize) -> Self {
        let rows = self
            .rows
            .iter()
            .enumerate()
            .filter(|(idx, _)| idx + 1 != index)
            .map(|(_, row)| row.clone())
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Copy of the rows at the given 0-based positions, in the given order.
    pub fn select_rows(&self, positions: &[usize]) -> Self {
        let rows = positions
            .iter()
            .filter_map(|&pos| self.rows.get(pos).cloned())
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Contiguous slice of rows `[start, end)` (0-based), clamped to the table.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.rows.len());
        let start = start.min(end);
        Self {
            columns: self.columns.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }
}

/// Identity of a statistic: every analysis output column except `value` and `n`, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatisticKey {
    pub columns: Vec<(ColumnName, Cell)>,
}

impl StatisticKey {
    pub fn new(columns: Vec<(ColumnName, Cell)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, cell)| cell)
    }

    /// Restrict the key to `names`, in that order; absent columns become null.
    pub fn project(&self, names: &[ColumnName]) -> StatisticKey {
        StatisticKey {
            columns: names
                .iter()
                .map(|name| (name.clone(), self.get(name).cloned().unwrap_or(Cell::Null)))
                .collect(),
        }
    }

    pub fn column_names(&self) -> Vec<ColumnName> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// One statistic row of a task's partial result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialResultRow {
    pub key: StatisticKey,
    /// Observation count from the full-subset run.
    pub n: f64,
    /// Largest leave-one-out change observed within the task's range.
    pub ls: f64,
}

/// Output of one task; stored at the task's key and overwritten on re-execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub job_id: String,
    pub task_id: String,
    pub rows: Vec<PartialResultRow>,
}

/// Maximum observed sensitivity for one statistic identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MosRow {
    pub key: StatisticKey,
    /// Largest `n * ls` over every task that produced this statistic.
    pub chi: f64,
}

/// One statistic of the baseline ("true value") run against the full dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaselineRow {
    pub key: StatisticKey,
    pub value: Option<f64>,
    pub n: f64,
}

/// Aggregated view of one statistic, ready for noise calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatisticRecord {
    pub statistic_id: StatisticId,
    pub analysis_id: AnalysisId,
    pub key: StatisticKey,
    /// Baseline value computed on the unsampled dataset.
    pub value: Option<f64>,
    pub n: f64,
    /// `None` when no sampled subset produced this statistic; never released.
    pub chi: Option<f64>,
}

impl StatisticRecord {
    /// Statistic name from the `statistic` column, when present as text.
    pub fn statistic_name(&self) -> Option<&str> {
        self.key
            .get(crate::constants::columns::STATISTIC)
            .and_then(Cell::as_str)
    }

    /// True when the count meets `min_cell_size`.
    pub fn meets_cell_size(&self, min_cell_size: f64) -> bool {
        self.n >= min_cell_size
    }

    /// True when the count meets `min_cell_size` and both value and chi are present.
    pub fn is_releasable(&self, min_cell_size: f64) -> bool {
        self.meets_cell_size(min_cell_size) && self.n > 0.0 && self.value.is_some() && self.chi.is_some()
    }
}

/// One released statistic of a sanitization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SanitizedRecord {
    pub statistic_id: StatisticId,
    pub analysis_id: AnalysisId,
    pub key: StatisticKey,
    pub epsilon: Epsilon,
    pub value_sanitized: f64,
    /// Displayed noise magnitude at the configured percentile; informational only.
    pub noise_percentile: f64,
    pub run_id: RunId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table::new(
            vec!["id".into(), "income".into()],
            vec![
                vec![Cell::Int(1), Cell::Float(10.0)],
                vec![Cell::Int(2), Cell::Float(20.0)],
                vec![Cell::Int(3), Cell::Float(30.0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn without_row_is_one_based() {
        let table = sample_table();
        let removed = table.without_row(1);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed.rows[0][0], Cell::Int(2));

        let last = table.without_row(3);
        assert_eq!(last.rows[1][0], Cell::Int(2));

        let untouched = table.without_row(0);
        assert_eq!(untouched.len(), 3);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Table::new(
            vec!["a".into(), "b".into()],
            vec![vec![Cell::Int(1)]],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn cell_parsing_prefers_integers_then_floats() {
        assert_eq!(Cell::parse("12"), Cell::Int(12));
        assert_eq!(Cell::parse("1.5"), Cell::Float(1.5));
        assert_eq!(Cell::parse(" NA "), Cell::Null);
        assert_eq!(Cell::parse(""), Cell::Null);
        assert_eq!(Cell::parse("mean"), Cell::Text("mean".into()));
    }

    #[test]
    fn float_cells_hash_by_bits() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Cell::Float(0.5));
        assert!(set.contains(&Cell::Float(0.5)));
        assert!(!set.contains(&Cell::Int(0)));
    }

    #[test]
    fn key_projection_fills_missing_columns_with_null() {
        let key = StatisticKey::new(vec![
            ("statistic".into(), Cell::from("mean")),
            ("group".into(), Cell::Int(2)),
        ]);
        let projected = key.project(&["group".into(), "other".into()]);
        assert_eq!(
            projected.columns,
            vec![
                ("group".to_string(), Cell::Int(2)),
                ("other".to_string(), Cell::Null)
            ]
        );
    }
}
