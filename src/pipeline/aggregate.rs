// src/pipeline/aggregate.rs

//! Aggregate stage: merged dataset to per-level tables.

use std::path::Path;

use crate::error::Result;
use crate::models::{AdminLevel, LevelSummary};
use crate::services::aggregator;
use crate::storage::csv;
use crate::utils::report;

pub const SUMMARY_FILE: &str = "aggregation_summary.csv";
pub const COMBINED_FILE: &str = "combined_aggregated_report.csv";

/// File name of one level's table, e.g. `sido_aggregated.csv`.
pub fn level_file(level: AdminLevel) -> String {
    format!("{}_aggregated.csv", level.file_stem())
}

/// Aggregate `merged_file` at every level into `output_dir`.
///
/// With `combined`, all levels are also written to one file tagged by
/// level.
pub fn run_aggregate(
    merged_file: &Path,
    output_dir: &Path,
    combined: bool,
) -> Result<Vec<LevelSummary>> {
    let set = csv::read_row_set_with(merged_file, AdminLevel::Town.key_columns())?;
    log::info!(
        "Aggregating {} rows from {}",
        set.rows.len(),
        merged_file.display()
    );

    let levels = aggregator::aggregate_all(&set.rows);
    let mut summaries = Vec::with_capacity(levels.len());
    for (level, rows) in &levels {
        let path = output_dir.join(level_file(*level));
        csv::write_aggregated(&path, &set.candidates, rows, Some(*level))?;
        report::sub_item(&format!("{}: {} rows -> {}", level, rows.len(), path.display()));
        summaries.push(aggregator::summarize(*level, rows));
    }
    csv::write_level_summaries(&output_dir.join(SUMMARY_FILE), &summaries)?;

    if combined {
        let all: Vec<_> = levels.into_iter().flat_map(|(_, rows)| rows).collect();
        csv::write_aggregated(&output_dir.join(COMBINED_FILE), &set.candidates, &all, None)?;
    }

    for summary in &summaries {
        log::info!(
            "{}: {} groups, {} eligible, {} cast, turnout {:.2}%",
            summary.level,
            summary.row_count,
            summary.eligible_voters,
            summary.votes_cast,
            summary.turnout_pct
        );
    }
    Ok(summaries)
}
