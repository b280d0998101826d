// src/models/mod.rs

//! Domain models for the election pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod election;
mod location;
mod row;
mod stats;
mod task;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, ElectionConfig, HierarchyConfig, LoggingConfig, MergeConfig,
    PathsConfig, PortalConfig, ProvinceEntry, RetryConfig,
};
pub use election::ElectionType;
pub use location::{LocationInfo, LocationNode};
pub use row::{
    AdminLevel, AggregatedRow, Dataset, ElectionRow, LevelSummary, RowSet, VoteCounts, coerce_count,
    columns, parse_count, turnout_pct,
};
pub use stats::{CrawlErrorEntry, CrawlStats, CrawlSummary};
pub use task::{DownloadTask, StoredFile, TaskOutcome, TaskState};
