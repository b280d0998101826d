// src/pipeline/merge.rs

//! Merge stage: per-location CSVs to one dataset.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::MergeConfig;
use crate::services::{MergeStats, Merger};
use crate::storage::csv;

use super::parse::SUMMARY_FILE;

/// Merge every per-location CSV in `csv_dir` into `output`.
///
/// A file missing an administrative column aborts the merge with the
/// column names.
pub fn run_merge(csv_dir: &Path, output: &Path, config: &MergeConfig) -> Result<MergeStats> {
    let files = csv_files(csv_dir, output)?;
    if files.is_empty() {
        return Err(AppError::validation(format!(
            "No CSV files to merge in {}",
            csv_dir.display()
        )));
    }
    log::info!("Merging {} CSV files from {}", files.len(), csv_dir.display());

    let row_sets = files
        .iter()
        .map(|path| csv::read_row_set(path))
        .collect::<Result<Vec<_>>>()?;

    let (dataset, stats) = Merger::new(config).merge_with_stats(row_sets);
    csv::write_dataset(output, &dataset)?;
    log::info!("Merged dataset written to {}", output.display());
    Ok(stats)
}

fn csv_files(dir: &Path, output: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        let is_summary = path.file_name().is_some_and(|n| n == SUMMARY_FILE);
        if is_csv && !is_summary && path != output {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
