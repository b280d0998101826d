//! Mapping from stored report files to the locations they describe.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::LocationNode;
use crate::storage::LocalStorage;

pub const MANIFEST_FILE: &str = "manifest.json";

/// `manifest.json` contents, keyed by path relative to the download root
/// with `/` separators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub generated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub entries: BTreeMap<String, LocationNode>,
}

impl Manifest {
    pub fn key_for(relative: &Path) -> String {
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn insert(&mut self, relative: &Path, location: LocationNode) {
        self.entries.insert(Self::key_for(relative), location);
    }

    pub fn get(&self, relative: &Path) -> Option<&LocationNode> {
        self.entries.get(&Self::key_for(relative))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load the manifest under `storage`, empty when none exists yet.
    pub async fn load(storage: &LocalStorage) -> Result<Self> {
        Ok(storage.read_json(MANIFEST_FILE).await?.unwrap_or_default())
    }

    /// Merge `self` over the manifest already on disk and write it back.
    pub async fn merge_into(self, storage: &LocalStorage) -> Result<Manifest> {
        let mut merged = Self::load(storage).await?;
        merged.entries.extend(self.entries);
        merged.generated_at = Some(chrono::Utc::now());
        storage.write_json(MANIFEST_FILE, &merged).await?;
        Ok(merged)
    }
}
