//! Local filesystem storage implementation.
//!
//! Every write goes to a sibling temp file first and is renamed into place,
//! so an interrupted run never leaves a half-written report under its final
//! name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::StoredFile;
use crate::storage::{Fingerprint, ReportStore};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    pub fn path(&self, key: impl AsRef<Path>) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    pub async fn write_bytes(&self, key: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::validation(format!("No file name in {}", path.display())))?;
        let tmp = path.with_file_name(format!("{file_name}.tmp"));

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        key: impl AsRef<Path>,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    pub async fn read_bytes(&self, key: impl AsRef<Path>) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    pub async fn read_json<T: DeserializeOwned>(&self, key: impl AsRef<Path>) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ReportStore for LocalStorage {
    async fn store(&self, relative: &Path, bytes: &[u8]) -> Result<StoredFile> {
        let path = self.path(relative);

        if let Some(existing) = self.fingerprint(relative).await? {
            let incoming = Fingerprint::of(bytes);
            if existing == incoming {
                log::debug!("Unchanged content at {} ({})", path.display(), incoming);
                return Ok(StoredFile::Duplicate { path });
            }
            log::debug!(
                "Content changed at {} ({} -> {}), rewriting",
                path.display(),
                existing,
                incoming
            );
        }

        self.write_bytes(relative, bytes).await?;
        Ok(StoredFile::Written {
            path,
            bytes: bytes.len() as u64,
        })
    }

    async fn fingerprint(&self, relative: &Path) -> Result<Option<Fingerprint>> {
        Ok(self
            .read_bytes(relative)
            .await?
            .map(|bytes| Fingerprint::of(&bytes)))
    }
}
