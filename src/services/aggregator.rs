// src/services/aggregator.rs

//! Group-by-and-sum over administrative levels.

use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::{AdminLevel, AggregatedRow, ElectionRow, LevelSummary, VoteCounts, turnout_pct};

/// Sum `rows` per distinct key at `level`, in first-seen key order.
///
/// Rows with a blank key segment cannot be grouped at this level and are
/// left out with a warning.
pub fn aggregate(rows: &[ElectionRow], level: AdminLevel) -> Vec<AggregatedRow> {
    let mut grouped = Grouper::new(level);
    let mut excluded = 0usize;

    for row in rows {
        let key: Vec<String> = level
            .key_columns()
            .iter()
            .map(|column| row.admin(column).unwrap_or_default().trim().to_string())
            .collect();
        if key.iter().any(String::is_empty) {
            log::debug!(
                "No {} key for {} / {} / {} / {}",
                level,
                row.province_name,
                row.district_name,
                row.town_name,
                row.precinct_name
            );
            excluded += 1;
            continue;
        }
        grouped.add(key, &row.counts);
    }

    if excluded > 0 {
        log::warn!("{excluded} rows excluded from {level} aggregation: blank key");
    }
    grouped.finish()
}

/// Re-aggregate already grouped rows to a coarser `level`.
///
/// Equivalent to [`aggregate`] on the underlying rows for every numeric
/// column.
pub fn rollup(rows: &[AggregatedRow], level: AdminLevel) -> Result<Vec<AggregatedRow>> {
    let mut grouped = Grouper::new(level);
    for row in rows {
        if row.level.depth() < level.depth() {
            return Err(AppError::validation(format!(
                "cannot roll {} rows up to {}",
                row.level, level
            )));
        }
        grouped.add(row.key[..level.depth()].to_vec(), &row.counts);
    }
    Ok(grouped.finish())
}

/// Row count and totals for one level.
pub fn summarize(level: AdminLevel, rows: &[AggregatedRow]) -> LevelSummary {
    let eligible_voters = rows.iter().map(|r| r.counts.eligible_voters).sum();
    let votes_cast = rows.iter().map(|r| r.counts.votes_cast).sum();
    LevelSummary {
        level,
        row_count: rows.len(),
        eligible_voters,
        votes_cast,
        turnout_pct: turnout_pct(eligible_voters, votes_cast),
    }
}

/// All three levels, coarsest first.
pub fn aggregate_all(rows: &[ElectionRow]) -> Vec<(AdminLevel, Vec<AggregatedRow>)> {
    AdminLevel::ALL
        .iter()
        .map(|level| (*level, aggregate(rows, *level)))
        .collect()
}

struct Grouper {
    level: AdminLevel,
    index: HashMap<Vec<String>, usize>,
    rows: Vec<AggregatedRow>,
}

impl Grouper {
    fn new(level: AdminLevel) -> Self {
        Self {
            level,
            index: HashMap::new(),
            rows: Vec::new(),
        }
    }

    fn add(&mut self, key: Vec<String>, counts: &VoteCounts) {
        let position = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.index.insert(key.clone(), self.rows.len());
                self.rows.push(AggregatedRow {
                    level: self.level,
                    key,
                    counts: VoteCounts::default(),
                });
                self.rows.len() - 1
            }
        };
        self.rows[position].counts.accumulate(counts);
    }

    fn finish(self) -> Vec<AggregatedRow> {
        self.rows
    }
}
