//! Service layer for the election pipeline.
//!
//! This module contains the business logic for:
//! - Request pacing and retries (`RateLimiter`, `RetryPolicy`)
//! - Portal access (`ElectionPortal`, `NecPortal`)
//! - Location enumeration (`LocationHierarchy`)
//! - Report downloading (`ElectionCrawler`)
//! - Table extraction (`TableExtractor`)
//! - Dataset merging (`Merger`)
//! - Administrative aggregation (`aggregator`)

pub mod aggregator;
mod crawler;
mod extractor;
mod hierarchy;
mod merger;
mod portal;
mod retry;

pub use crawler::{CRAWL_STATS_FILE, ElectionCrawler, report_relative_path};
pub use extractor::TableExtractor;
pub use hierarchy::{Catalog, LocationHierarchy, order_provinces};
pub use merger::{MergeStats, Merger};
pub use portal::{ElectionPortal, NecPortal, ReportPayload, parse_catalog_json, parse_select_options};
pub use retry::{
    RateLimiter, RecordingSleeper, RequestContext, RetryPolicy, Sleeper, TokioSleeper,
};
