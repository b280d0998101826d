//! Storage abstractions for downloaded reports and tabular outputs.
//!
//! ## Directory Structure
//!
//! ```text
//! election_results/
//! ├── manifest.json             # relative path -> LocationNode
//! ├── crawl_stats.json          # counters of the last crawl
//! └── 1100/                     # one directory per province code
//!     ├── 개표단위별_1101.xls
//!     └── election_report_1100_1102.html
//! ```

pub mod csv;
pub mod local;
pub mod manifest;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::StoredFile;

// Re-export for convenience
pub use local::LocalStorage;
pub use manifest::Manifest;

/// Size and SHA-256 of a payload, used to detect unchanged downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    pub sha256: String,
}

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            size: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(bytes)),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B/{}", self.size, &self.sha256[..self.sha256.len().min(12)])
    }
}

/// Trait for report storage backends.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Store `bytes` at `relative`.
    ///
    /// Identical content already present is left untouched and reported as
    /// [`StoredFile::Duplicate`]. Anything else, including a truncated
    /// earlier download, is overwritten.
    async fn store(&self, relative: &Path, bytes: &[u8]) -> Result<StoredFile>;

    /// Fingerprint of the file at `relative`, `None` when absent.
    async fn fingerprint(&self, relative: &Path) -> Result<Option<Fingerprint>>;
}
