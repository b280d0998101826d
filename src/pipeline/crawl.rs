// src/pipeline/crawl.rs

//! Crawl stage: download every report of the configured election.

use crate::error::Result;
use crate::models::{Config, CrawlStats};
use crate::services::ElectionCrawler;

/// Run the crawler with the concurrency settings from `config`.
pub async fn run_crawl(config: &Config) -> Result<CrawlStats> {
    let crawler = ElectionCrawler::new(config)?;
    crawler
        .crawl_all_locations(config.crawler.concurrent, config.crawler.max_workers)
        .await
}
