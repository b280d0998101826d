//! Pipeline entry points, one per stage.
//!
//! - `run_crawl`: Download reports for every location
//! - `run_parse`: Extract result tables into per-location CSVs
//! - `run_merge`: Merge per-location CSVs into one dataset
//! - `run_aggregate`: Sum the dataset by administrative level
//! - `run_pipeline`: All of the above in order
//! - `run_validate`: Check a configuration file

pub mod aggregate;
pub mod crawl;
pub mod merge;
pub mod parse;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod validate;

pub use aggregate::run_aggregate;
pub use crawl::run_crawl;
pub use merge::run_merge;
pub use parse::{ParseStats, run_parse};
pub use pipeline::run_pipeline;
pub use validate::run_validate;
