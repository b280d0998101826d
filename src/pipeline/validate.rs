// src/pipeline/validate.rs

use std::path::Path;

use crate::error::Result;
use crate::models::Config;
use crate::utils::{join_url, report};

/// Load and validate the configuration file at `path`.
///
/// Unlike the other commands, a missing or malformed file is an error here
/// rather than a fallback to defaults.
pub fn run_validate(path: &Path) -> Result<Config> {
    report::header(&format!("Validating {}", path.display()));

    let config = Config::load(path).inspect_err(|e| log::error!("Config load failed: {e}"))?;
    config
        .validate()
        .inspect_err(|e| log::error!("Config validation failed: {e}"))?;
    let election = config.election_type()?;

    for endpoint in [
        &config.portal.document_path,
        &config.portal.town_catalog_path,
        &config.portal.constituency_catalog_path,
        &config.portal.report_path,
    ] {
        join_url(&config.portal.base_url, endpoint)?;
    }

    log::info!("✓ Config OK");
    report::sub_item(&format!(
        "Election: {} ({} / code {})",
        config.election.id,
        election.label(),
        election.code()
    ));
    report::sub_item(&format!("Portal: {}", config.portal.base_url));
    report::sub_item(&format!(
        "Mode: {}",
        if config.crawler.concurrent {
            format!("concurrent, {} workers", config.crawler.max_workers)
        } else {
            "sequential".to_string()
        }
    ));
    report::sub_item(&format!(
        "Retry: {} attempts, {} ms base delay",
        config.retry.max_attempts, config.retry.base_delay_ms
    ));
    report::sub_item(&format!(
        "Paths: {} -> {} -> {} -> {}",
        config.paths.download_dir.display(),
        config.paths.csv_dir.display(),
        config.paths.merged_file.display(),
        config.paths.aggregate_dir.display()
    ));
    report::sub_item(&format!(
        "Provinces: {}",
        config.hierarchy.provinces.len()
    ));

    Ok(config)
}
