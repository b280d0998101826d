// src/pipeline/pipeline.rs

use crate::error::Result;
use crate::models::{Config, CrawlStats};
use crate::utils::report;

use super::aggregate::run_aggregate;
use super::crawl::run_crawl;
use super::merge::run_merge;
use super::parse::run_parse;

/// Run the full pipeline: crawl, parse, merge, aggregate.
///
/// Per-location crawl failures do not stop later stages; the returned stats
/// carry them.
pub async fn run_pipeline(config: &Config, combined: bool) -> Result<CrawlStats> {
    report::header("Running full election pipeline");
    let paths = &config.paths;

    report::step(1, 4, "Crawl - Downloading reports");
    let stats = run_crawl(config).await?;

    report::step(2, 4, "Parse - Extracting result tables");
    run_parse(
        &paths.download_dir,
        &paths.csv_dir,
        &config.hierarchy.provinces,
        true,
    )
    .await?;

    report::step(3, 4, "Merge - Combining per-location files");
    run_merge(&paths.csv_dir, &paths.merged_file, &config.merge)?;

    report::step(4, 4, "Aggregate - Summing by administrative level");
    run_aggregate(&paths.merged_file, &paths.aggregate_dir, combined)?;

    log::info!("Pipeline complete");
    Ok(stats)
}
