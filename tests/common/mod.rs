#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mos_sanitizer::{
    AnalysisCatalog, AnalysisError, Cell, DatasetCatalog, FnAnalysis, InMemoryDataset,
    PipelineConfig, Table,
};

pub const DATASET_ID: &str = "people";
pub const SCRIPT_REF: &str = "summary";

/// `age,state` rows: alternating VA/MD plus three DC rows.
pub fn people(rows: usize) -> Table {
    let mut data: Vec<Vec<Cell>> = (0..rows)
        .map(|idx| {
            let state = if idx % 2 == 0 { "VA" } else { "MD" };
            vec![Cell::Int(20 + (idx % 50) as i64), Cell::from(state)]
        })
        .collect();
    for age in [31, 47, 62] {
        data.push(vec![Cell::Int(age), Cell::from("DC")]);
    }
    Table::new(vec!["age".into(), "state".into()], data).unwrap()
}

/// Mean age per state (first-seen state order) and the total row count.
pub fn summary_routine() -> FnAnalysis {
    FnAnalysis::new(SCRIPT_REF, |table: &Table| {
        let age = table
            .column_index("age")
            .ok_or_else(|| AnalysisError::MissingColumn("age".into()))?;
        let state = table
            .column_index("state")
            .ok_or_else(|| AnalysisError::MissingColumn("state".into()))?;

        let mut groups: Vec<(String, f64, f64)> = Vec::new();
        for row in &table.rows {
            let name = row[state].to_string();
            let value = row[age].as_f64().unwrap_or(0.0);
            match groups.iter_mut().find(|(group, _, _)| *group == name) {
                Some((_, sum, count)) => {
                    *sum += value;
                    *count += 1.0;
                }
                None => groups.push((name, value, 1.0)),
            }
        }

        let columns = vec![
            "analysis_name".to_string(),
            "analysis_type".to_string(),
            "statistic".to_string(),
            "group".to_string(),
            "value".to_string(),
            "n".to_string(),
        ];
        let mut rows: Vec<Vec<Cell>> = groups
            .into_iter()
            .map(|(name, sum, count)| {
                vec![
                    Cell::from("summary"),
                    Cell::from("univariate"),
                    Cell::from("mean"),
                    Cell::from(name),
                    Cell::Float(sum / count),
                    Cell::Float(count),
                ]
            })
            .collect();
        let total = table.len() as f64;
        rows.push(vec![
            Cell::from("summary"),
            Cell::from("count"),
            Cell::from("nobs"),
            Cell::Null,
            Cell::Float(total),
            Cell::Float(total),
        ]);
        Ok(Table::new(columns, rows).unwrap())
    })
}

pub fn failing_routine() -> FnAnalysis {
    FnAnalysis::new(SCRIPT_REF, |_: &Table| {
        Err(AnalysisError::Failed {
            routine: SCRIPT_REF.into(),
            reason: "age column held 99999".into(),
        })
    })
}

pub fn catalogs(routine: FnAnalysis, rows: usize) -> (AnalysisCatalog, DatasetCatalog) {
    (
        AnalysisCatalog::new().with(Arc::new(routine)),
        DatasetCatalog::new().with(Arc::new(InMemoryDataset::new(DATASET_ID, people(rows)))),
    )
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        sample_fraction: 0.5,
        shard_count: 4,
        job_timeout: Duration::from_secs(30),
        seed: Some(11),
        ..PipelineConfig::default()
    }
    .validated()
    .unwrap()
}
