//! Maximum observed sensitivity.
//!
//! Every task contributes an independent local maximum per statistic. The
//! aggregator keeps the largest `chi = n * ls` per statistic identity, then
//! left-joins the baseline so every true value carries its chi, or none when
//! no sampled subset produced the statistic.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::baseline::BaselineArtifact;
use crate::constants::columns::{ANALYSIS_NAME, ANALYSIS_TYPE};
use crate::data::{Cell, MosRow, PartialResult, StatisticKey, StatisticRecord};
use crate::errors::PipelineError;
use crate::metrics::release_summary;
use crate::transport::{ArtifactStore, keys, put_json, require_json};
use crate::types::{AnalysisId, JobId};

/// Aggregated statistics of one job; input to every sanitization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MosArtifact {
    pub job_id: JobId,
    pub records: Vec<StatisticRecord>,
}

/// One row per statistic identity holding the largest `n * ls` across `partials`.
///
/// Rows are stably sorted by chi descending before deduplication, so ties keep
/// the first occurrence in input order. The result is in descending chi order.
pub fn compute_mos(partials: &[PartialResult]) -> Vec<MosRow> {
    let mut rows: Vec<MosRow> = partials
        .iter()
        .flat_map(|partial| partial.rows.iter())
        .map(|row| MosRow {
            key: row.key.clone(),
            chi: row.n * row.ls,
        })
        .collect();
    rows.sort_by(|a, b| b.chi.total_cmp(&a.chi));

    let mut retained: IndexMap<StatisticKey, MosRow> = IndexMap::new();
    for row in rows {
        retained.entry(row.key.clone()).or_insert(row);
    }
    retained.into_values().collect()
}

/// Left-join `mos` onto the baseline and assign ids.
///
/// The join uses the baseline's key columns. `statistic_id` is dense from 0 in
/// baseline order; `analysis_id` numbers `(analysis_name, analysis_type)`
/// pairs in first-seen order.
pub fn combine_with_baseline(baseline: &BaselineArtifact, mos: &[MosRow]) -> Vec<StatisticRecord> {
    let mut chi_by_key: HashMap<StatisticKey, f64> = HashMap::with_capacity(mos.len());
    for row in mos {
        chi_by_key
            .entry(row.key.project(&baseline.key_columns))
            .or_insert(row.chi);
    }

    let mut analysis_ids: IndexMap<(Cell, Cell), AnalysisId> = IndexMap::new();
    baseline
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let group = (
                row.key.get(ANALYSIS_NAME).cloned().unwrap_or(Cell::Null),
                row.key.get(ANALYSIS_TYPE).cloned().unwrap_or(Cell::Null),
            );
            let next_id = analysis_ids.len() as AnalysisId;
            let analysis_id = *analysis_ids.entry(group).or_insert(next_id);
            StatisticRecord {
                statistic_id: idx as u64,
                analysis_id,
                key: row.key.clone(),
                value: row.value,
                n: row.n,
                chi: chi_by_key
                    .get(&row.key.project(&baseline.key_columns))
                    .copied(),
            }
        })
        .collect()
}

/// Reads every partial result of a job and writes its MOS artifact.
pub struct Aggregator {
    store: Arc<dyn ArtifactStore>,
    min_cell_size: f64,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ArtifactStore>, min_cell_size: f64) -> Self {
        Self {
            store,
            min_cell_size,
        }
    }

    pub fn aggregate(&self, job_id: &str) -> Result<MosArtifact, PipelineError> {
        let store = self.store.as_ref();
        let partial_keys = store.list(&keys::partial_results_prefix(job_id))?;
        let partials = partial_keys
            .iter()
            .map(|key| require_json::<PartialResult>(store, key))
            .collect::<Result<Vec<_>, _>>()?;
        let baseline: BaselineArtifact = require_json(store, &keys::baseline(job_id))?;

        let mos = compute_mos(&partials);
        let records = combine_with_baseline(&baseline, &mos);
        let missing = records.iter().filter(|record| record.chi.is_none()).count();
        if missing > 0 {
            warn!(
                "[mos:aggregate] job '{job_id}' has {missing} statistics without chi; they will not be released"
            );
        }
        if let Some(summary) = release_summary(&records, self.min_cell_size) {
            info!(
                "[mos:aggregate] job '{job_id}' {} partials -> {} statistics ({} releasable, {} suppressed, {} missing chi)",
                partials.len(),
                summary.total,
                summary.releasable,
                summary.suppressed,
                summary.missing_chi
            );
        }

        let artifact = MosArtifact {
            job_id: job_id.to_string(),
            records,
        };
        put_json(store, &keys::mos(job_id), &artifact)?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BaselineRow, PartialResultRow};
    use crate::transport::InMemoryArtifactStore;

    fn key(statistic: &str, group: i64) -> StatisticKey {
        StatisticKey::new(vec![
            (ANALYSIS_NAME.into(), Cell::from("summary")),
            (ANALYSIS_TYPE.into(), Cell::from("univariate")),
            ("statistic".into(), Cell::from(statistic)),
            ("group".into(), Cell::Int(group)),
        ])
    }

    fn partial(task_id: &str, rows: Vec<(StatisticKey, f64, f64)>) -> PartialResult {
        PartialResult {
            job_id: "j".into(),
            task_id: task_id.into(),
            rows: rows
                .into_iter()
                .map(|(key, n, ls)| PartialResultRow { key, n, ls })
                .collect(),
        }
    }

    #[test]
    fn keeps_largest_chi_per_statistic() {
        let partials = vec![
            partial("a", vec![(key("mean", 1), 10.0, 2.0)]),
            partial("b", vec![(key("mean", 1), 5.0, 5.0)]),
        ];
        let mos = compute_mos(&partials);
        assert_eq!(mos.len(), 1);
        assert_eq!(mos[0].chi, 25.0);
        assert_eq!(mos[0].key, key("mean", 1));
    }

    #[test]
    fn ties_keep_first_occurrence() {
        let mut tagged = key("mean", 1);
        tagged.columns.push(("tag".into(), Cell::from("first")));
        let mut other = key("mean", 1);
        other.columns.push(("tag".into(), Cell::from("second")));
        let partials = vec![
            partial("a", vec![(tagged.clone(), 4.0, 1.0)]),
            partial("b", vec![(other, 2.0, 2.0)]),
        ];
        let mos = compute_mos(&partials);
        let combined = combine_with_baseline(
            &BaselineArtifact {
                job_id: "j".into(),
                key_columns: key("mean", 1).column_names(),
                rows: vec![BaselineRow {
                    key: key("mean", 1),
                    value: Some(1.0),
                    n: 40.0,
                }],
            },
            &mos,
        );
        assert_eq!(mos[0].key, tagged);
        assert_eq!(combined[0].chi, Some(4.0));
    }

    #[test]
    fn baseline_join_assigns_ids_and_null_chi() {
        let baseline = BaselineArtifact {
            job_id: "j".into(),
            key_columns: key("mean", 1).column_names(),
            rows: vec![
                BaselineRow {
                    key: key("mean", 1),
                    value: Some(3.5),
                    n: 100.0,
                },
                BaselineRow {
                    key: key("mean", 2),
                    value: Some(1.5),
                    n: 100.0,
                },
                BaselineRow {
                    key: StatisticKey::new(vec![
                        (ANALYSIS_NAME.into(), Cell::from("regression")),
                        (ANALYSIS_TYPE.into(), Cell::from("ols")),
                        ("statistic".into(), Cell::from("nobs")),
                        ("group".into(), Cell::Null),
                    ]),
                    value: Some(100.0),
                    n: 100.0,
                },
            ],
        };
        let mos = compute_mos(&[partial("a", vec![(key("mean", 1), 10.0, 0.5)])]);
        let records = combine_with_baseline(&baseline, &mos);

        assert_eq!(
            records.iter().map(|r| r.statistic_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            records.iter().map(|r| r.analysis_id).collect::<Vec<_>>(),
            vec![0, 0, 1]
        );
        assert_eq!(records[0].chi, Some(5.0));
        assert_eq!(records[1].chi, None);
        assert_eq!(records[2].chi, None);
    }

    #[test]
    fn aggregate_reads_partials_and_writes_mos() {
        let store = Arc::new(InMemoryArtifactStore::new());
        put_json(
            store.as_ref(),
            &keys::baseline("j"),
            &BaselineArtifact {
                job_id: "j".into(),
                key_columns: key("mean", 1).column_names(),
                rows: vec![BaselineRow {
                    key: key("mean", 1),
                    value: Some(2.0),
                    n: 20.0,
                }],
            },
        )
        .unwrap();
        for (task, n, ls) in [("t1", 10.0, 2.0), ("t2", 5.0, 5.0)] {
            put_json(
                store.as_ref(),
                &keys::partial_result("j", task),
                &partial(task, vec![(key("mean", 1), n, ls)]),
            )
            .unwrap();
        }

        let artifact = Aggregator::new(store.clone(), 10.0).aggregate("j").unwrap();
        assert_eq!(artifact.records.len(), 1);
        assert_eq!(artifact.records[0].chi, Some(25.0));
        let stored: MosArtifact = require_json(store.as_ref(), &keys::mos("j")).unwrap();
        assert_eq!(stored, artifact);
    }

    #[test]
    fn aggregate_without_baseline_fails() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let err = Aggregator::new(store, 10.0).aggregate("none").unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact(_)));
    }
}
