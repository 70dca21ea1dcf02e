use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;

use super::DatasetSource;
use crate::data::{Cell, Table};
use crate::errors::PipelineError;
use crate::types::DatasetId;

/// Dataset stored as a header line followed by comma-separated rows.
///
/// Fields may be wrapped in double quotes to hold the delimiter, line breaks,
/// or `""` for a literal quote. Empty fields and `NA` load as null, integers
/// and floats load as numbers, anything else as text.
#[derive(Clone, Debug)]
pub struct CsvDataset {
    id: DatasetId,
    path: PathBuf,
    delimiter: char,
}

impl CsvDataset {
    pub fn new(id: impl Into<DatasetId>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            delimiter: ',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn unavailable(&self, reason: String) -> PipelineError {
        PipelineError::DatasetUnavailable {
            dataset_id: self.id.clone(),
            reason,
        }
    }
}

impl DatasetSource for CsvDataset {
    fn id(&self) -> &str {
        &self.id
    }

    fn load(&self) -> Result<Table, PipelineError> {
        let file = File::open(&self.path)
            .map_err(|err| self.unavailable(format!("{}: {err}", self.path.display())))?;
        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0;

        let Some(header) = self.next_record(&mut lines, &mut line_no)? else {
            return Err(self.unavailable("file is empty".to_string()));
        };
        let columns: Vec<String> = header
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let name = if idx == 0 {
                    name.trim_start_matches('\u{feff}')
                } else {
                    name.as_str()
                };
                name.trim().to_string()
            })
            .collect();

        let mut rows = Vec::new();
        while let Some(fields) = self.next_record(&mut lines, &mut line_no)? {
            if fields.len() != columns.len() {
                return Err(self.unavailable(format!(
                    "line {line_no} has {} fields, expected {}",
                    fields.len(),
                    columns.len()
                )));
            }
            rows.push(fields.iter().map(|field| Cell::parse(field)).collect());
        }
        Table::new(columns, rows)
    }
}

impl CsvDataset {
    /// Next non-blank record, joining physical lines while a quote is open.
    fn next_record(
        &self,
        lines: &mut Lines<BufReader<File>>,
        line_no: &mut usize,
    ) -> Result<Option<Vec<String>>, PipelineError> {
        let mut pending = String::new();
        for line in lines.by_ref() {
            let line = line?;
            *line_no += 1;
            if pending.is_empty() && line.trim().is_empty() {
                continue;
            }
            if !pending.is_empty() {
                pending.push('\n');
            }
            pending.push_str(&line);
            if let Some(fields) = split_record(&pending, self.delimiter) {
                return Ok(Some(fields));
            }
        }
        if pending.is_empty() {
            Ok(None)
        } else {
            Err(self.unavailable(format!("unterminated quoted field near line {line_no}")))
        }
    }
}

/// Split one record on `delimiter`, honouring double-quoted fields.
/// Returns `None` while a quoted field is still open.
fn split_record(record: &str, delimiter: char) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = record.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' if field.is_empty() => quoted = true,
            ch if ch == delimiter && !quoted => fields.push(std::mem::take(&mut field)),
            ch => field.push(ch),
        }
    }
    if quoted {
        return None;
    }
    fields.push(field);
    Some(fields)
}
