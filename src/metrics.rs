use indexmap::IndexMap;

use crate::data::StatisticRecord;
use crate::types::AnalysisId;

/// Release eligibility counts for an aggregated job.
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseSummary {
    pub total: usize,
    pub releasable: usize,
    /// Below the minimum cell size or without a baseline value.
    pub suppressed: usize,
    /// No sampled subset produced the statistic.
    pub missing_chi: usize,
    pub releasable_share: f64,
    pub per_analysis: Vec<AnalysisShare>,
}

/// Per-analysis share of releasable statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisShare {
    pub analysis_id: AnalysisId,
    pub total: usize,
    pub releasable: usize,
}

/// Classify every record; `None` for an empty job.
pub fn release_summary(records: &[StatisticRecord], min_cell_size: f64) -> Option<ReleaseSummary> {
    if records.is_empty() {
        return None;
    }
    let mut releasable = 0;
    let mut suppressed = 0;
    let mut missing_chi = 0;
    let mut per_analysis: IndexMap<AnalysisId, AnalysisShare> = IndexMap::new();
    for record in records {
        let share = per_analysis
            .entry(record.analysis_id)
            .or_insert(AnalysisShare {
                analysis_id: record.analysis_id,
                total: 0,
                releasable: 0,
            });
        share.total += 1;
        if record.chi.is_none() {
            missing_chi += 1;
        } else if record.is_releasable(min_cell_size) {
            releasable += 1;
            share.releasable += 1;
        } else {
            suppressed += 1;
        }
    }
    let total = records.len();
    let mut per_analysis: Vec<AnalysisShare> = per_analysis.into_values().collect();
    per_analysis.sort_by_key(|share| share.analysis_id);
    Some(ReleaseSummary {
        total,
        releasable,
        suppressed,
        missing_chi,
        releasable_share: releasable as f64 / total as f64,
        per_analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StatisticKey;

    fn record(id: u64, analysis_id: u64, n: f64, chi: Option<f64>) -> StatisticRecord {
        StatisticRecord {
            statistic_id: id,
            analysis_id,
            key: StatisticKey::default(),
            value: Some(1.0),
            n,
            chi,
        }
    }

    #[test]
    fn summary_separates_suppressed_and_missing_chi() {
        let records = vec![
            record(0, 0, 50.0, Some(2.0)),
            record(1, 0, 5.0, Some(2.0)),
            record(2, 1, 50.0, None),
            record(3, 1, 10.0, Some(0.0)),
        ];
        let summary = release_summary(&records, 10.0).unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.releasable, 2);
        assert_eq!(summary.suppressed, 1);
        assert_eq!(summary.missing_chi, 1);
        assert!((summary.releasable_share - 0.5).abs() < 1e-12);
        assert_eq!(
            summary.per_analysis,
            vec![
                AnalysisShare {
                    analysis_id: 0,
                    total: 2,
                    releasable: 1
                },
                AnalysisShare {
                    analysis_id: 1,
                    total: 2,
                    releasable: 1
                },
            ]
        );
    }

    #[test]
    fn empty_job_has_no_summary() {
        assert!(release_summary(&[], 10.0).is_none());
    }
}
