// src/services/merger.rs

//! Concatenation of per-location row sets into one dataset.

use std::collections::HashSet;

use crate::models::{Dataset, ElectionRow, MergeConfig, RowSet};
use crate::utils::report;

/// Figures logged after a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub sources: usize,
    pub rows: usize,
    pub dropped_summary_rows: usize,
    pub columns: usize,
    pub provinces: usize,
    pub districts: usize,
    pub towns: usize,
    /// Rows where votes cast differ from valid plus invalid votes
    pub inconsistent_rows: usize,
}

/// Merges row sets, reconciling candidate columns by union.
pub struct Merger {
    excluded_towns: HashSet<String>,
    excluded_precincts: HashSet<String>,
}

impl Merger {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            excluded_towns: config.excluded_towns.iter().map(|s| compact(s)).collect(),
            excluded_precincts: config.excluded_precincts.iter().map(|s| compact(s)).collect(),
        }
    }

    /// Concatenate `row_sets` in the order given.
    ///
    /// Candidates missing from a source are set to 0 on its rows, and
    /// province/district names fall back to the source location.
    pub fn merge(&self, row_sets: Vec<RowSet>) -> Dataset {
        self.merge_with_stats(row_sets).0
    }

    pub fn merge_with_stats(&self, row_sets: Vec<RowSet>) -> (Dataset, MergeStats) {
        let mut stats = MergeStats {
            sources: row_sets.len(),
            ..MergeStats::default()
        };

        let mut candidates: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for set in &row_sets {
            for name in set.candidates.iter().chain(
                set.rows
                    .iter()
                    .flat_map(|r| sorted_keys(&r.counts.candidate_votes)),
            ) {
                if seen.insert(name.clone()) {
                    candidates.push(name.clone());
                }
            }
        }

        let mut rows = Vec::new();
        for set in row_sets {
            for mut row in set.rows {
                if self.is_summary_row(&row) {
                    stats.dropped_summary_rows += 1;
                    continue;
                }
                if let Some(location) = &set.location {
                    if row.province_name.is_empty() {
                        row.province_name = location.province_name.clone();
                    }
                    if row.district_name.is_empty() {
                        row.district_name = location.district_name.clone();
                    }
                }
                for name in &candidates {
                    row.counts.candidate_votes.entry(name.clone()).or_insert(0);
                }
                rows.push(row);
            }
        }

        let dataset = Dataset { candidates, rows };
        stats.rows = dataset.rows.len();
        stats.columns = dataset.columns().len();
        stats.provinces = distinct(&dataset.rows, |r| r.province_name.clone());
        stats.districts = distinct(&dataset.rows, |r| {
            (r.province_name.clone(), r.district_name.clone())
        });
        stats.towns = distinct(&dataset.rows, |r| {
            (
                r.province_name.clone(),
                r.district_name.clone(),
                r.town_name.clone(),
            )
        });
        stats.inconsistent_rows = dataset.rows.iter().filter(|r| !r.is_consistent()).count();

        log_stats(&stats);
        (dataset, stats)
    }

    fn is_summary_row(&self, row: &ElectionRow) -> bool {
        self.excluded_towns.contains(&compact(&row.town_name))
            || self.excluded_precincts.contains(&compact(&row.precinct_name))
    }
}

fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn sorted_keys<V>(map: &std::collections::HashMap<String, V>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

fn distinct<K: std::hash::Hash + Eq>(rows: &[ElectionRow], key: impl Fn(&ElectionRow) -> K) -> usize {
    rows.iter().map(key).collect::<HashSet<_>>().len()
}

fn log_stats(stats: &MergeStats) {
    report::summary(
        "Merge",
        &[
            ("Sources", stats.sources.to_string()),
            ("Rows", stats.rows.to_string()),
            ("Summary rows dropped", stats.dropped_summary_rows.to_string()),
            ("Columns", stats.columns.to_string()),
            ("Provinces", stats.provinces.to_string()),
            ("Districts", stats.districts.to_string()),
            ("Towns", stats.towns.to_string()),
        ],
    );
    if stats.inconsistent_rows > 0 {
        log::warn!(
            "{} rows where 투표수 != 계 + 무효투표수",
            stats.inconsistent_rows
        );
    }
}
