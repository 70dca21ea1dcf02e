//! Boundary to the analyst-supplied statistic routine.
//!
//! The routine is a pure `(table) -> table` function. Its output has one row
//! per statistic: arbitrary identifying columns plus mandatory `value` and `n`.
//! Native routines wrap a closure (`FnAnalysis`); foreign routines run out of
//! process (`CommandAnalysis`) and exchange tables as JSON over stdio.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use crate::constants::columns::{N, VALUE};
use crate::data::{BaselineRow, Cell, StatisticKey, Table};
use crate::errors::{AnalysisError, PipelineError};
use crate::types::ScriptRef;

/// Analyst-supplied statistic computation.
pub trait AnalysisRoutine: Send + Sync {
    /// Reference this routine is registered under (the task message `script_ref`).
    fn name(&self) -> &str;
    /// Compute every statistic over `table`.
    fn run(&self, table: &Table) -> Result<Table, AnalysisError>;
}

type AnalysisFn = dyn Fn(&Table) -> Result<Table, AnalysisError> + Send + Sync;

/// In-process routine backed by a Rust closure.
#[derive(Clone)]
pub struct FnAnalysis {
    name: String,
    func: Arc<AnalysisFn>,
}

impl FnAnalysis {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Table) -> Result<Table, AnalysisError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl AnalysisRoutine for FnAnalysis {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, table: &Table) -> Result<Table, AnalysisError> {
        (self.func)(table)
    }
}

/// Out-of-process routine: the input table is written to stdin as JSON and
/// the output table is read back from stdout.
#[derive(Clone, Debug)]
pub struct CommandAnalysis {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl CommandAnalysis {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl AnalysisRoutine for CommandAnalysis {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, table: &Table) -> Result<Table, AnalysisError> {
        let payload = serde_json::to_vec(table).map_err(|err| AnalysisError::Spawn {
            routine: self.name.clone(),
            reason: format!("failed encoding input table: {err}"),
        })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| AnalysisError::Spawn {
                routine: self.name.clone(),
                reason: format!("{}: {err}", self.program.display()),
            })?;

        // Routines may write stdout before draining stdin.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                let result = stdin.write_all(&payload);
                drop(stdin);
                result
            })
        });

        let output = child.wait_with_output().map_err(|err| AnalysisError::Spawn {
            routine: self.name.clone(),
            reason: format!("failed waiting for routine: {err}"),
        })?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(err)) => {
                    return Err(AnalysisError::Spawn {
                        routine: self.name.clone(),
                        reason: format!("failed writing input table: {err}"),
                    });
                }
                Err(_) => {
                    return Err(AnalysisError::Spawn {
                        routine: self.name.clone(),
                        reason: "stdin writer panicked".to_string(),
                    });
                }
            }
        }

        if !output.status.success() {
            return Err(AnalysisError::Exited {
                routine: self.name.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let table: Table =
            serde_json::from_slice(&output.stdout).map_err(|err| AnalysisError::MalformedOutput {
                routine: self.name.clone(),
                details: format!("stdout is not a JSON table: {err}"),
            })?;
        table
            .validate()
            .map_err(|err| AnalysisError::MalformedOutput {
                routine: self.name.clone(),
                details: err.to_string(),
            })?;
        Ok(table)
    }
}

/// Routines addressable by `script_ref`.
#[derive(Clone, Default)]
pub struct AnalysisCatalog {
    routines: HashMap<ScriptRef, Arc<dyn AnalysisRoutine>>,
}

impl AnalysisCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `routine` under its own name, replacing any previous entry.
    pub fn register(&mut self, routine: Arc<dyn AnalysisRoutine>) {
        self.routines.insert(routine.name().to_string(), routine);
    }

    pub fn with(mut self, routine: Arc<dyn AnalysisRoutine>) -> Self {
        self.register(routine);
        self
    }

    pub fn resolve(&self, script_ref: &str) -> Result<Arc<dyn AnalysisRoutine>, PipelineError> {
        self.routines.get(script_ref).cloned().ok_or_else(|| {
            PipelineError::Configuration(format!("no analysis routine registered as '{script_ref}'"))
        })
    }
}

/// Parsed analysis output.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisOutput {
    /// Identifying column names, in output order.
    pub key_columns: Vec<String>,
    pub rows: Vec<BaselineRow>,
}

impl AnalysisOutput {
    /// Split each output row into its identity, value, and `n`.
    ///
    /// A null `value` is kept (`None`); a missing or non-numeric `n` is an error.
    pub fn from_table(table: &Table) -> Result<Self, AnalysisError> {
        let value_idx = table
            .column_index(VALUE)
            .ok_or_else(|| AnalysisError::MissingColumn(VALUE.to_string()))?;
        let n_idx = table
            .column_index(N)
            .ok_or_else(|| AnalysisError::MissingColumn(N.to_string()))?;
        let key_columns: Vec<String> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != value_idx && *idx != n_idx)
            .map(|(_, name)| name.clone())
            .collect();

        let mut rows = Vec::with_capacity(table.len());
        for (row_idx, row) in table.rows.iter().enumerate() {
            let n = row.get(n_idx).and_then(Cell::as_f64).ok_or_else(|| {
                AnalysisError::MalformedOutput {
                    routine: String::new(),
                    details: format!("row {} has a non-numeric '{N}'", row_idx + 1),
                }
            })?;
            let value = row.get(value_idx).and_then(Cell::as_f64);
            let key = StatisticKey::new(
                row.iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != value_idx && *idx != n_idx)
                    .map(|(idx, cell)| (table.columns[idx].clone(), cell.clone()))
                    .collect(),
            );
            rows.push(BaselineRow { key, value, n });
        }
        Ok(Self { key_columns, rows })
    }
}

/// Run `routine` over `table` and parse its output.
pub fn run_analysis(
    routine: &dyn AnalysisRoutine,
    table: &Table,
) -> Result<AnalysisOutput, AnalysisError> {
    let output = routine.run(table)?;
    AnalysisOutput::from_table(&output).map_err(|err| match err {
        AnalysisError::MalformedOutput { details, .. } => AnalysisError::MalformedOutput {
            routine: routine.name().to_string(),
            details,
        },
        other => other,
    })
}
