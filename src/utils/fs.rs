// src/utils/fs.rs

//! File naming and payload sniffing helpers.

use std::path::Path;

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};

/// Longest file stem kept after sanitizing, in grapheme clusters.
pub const MAX_FILENAME_GRAPHEMES: usize = 200;

const SNIFF_WINDOW: usize = 4096;
const OLE2_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Replace characters that are invalid in a path component.
///
/// Korean and other non-ASCII text is preserved.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim().trim_matches('.');
    trimmed
        .graphemes(true)
        .take(MAX_FILENAME_GRAPHEMES)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Kind of report payload returned by the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Html,
    /// Legacy OLE2 spreadsheet
    Xls,
    /// Zipped OOXML spreadsheet
    Xlsx,
}

impl PayloadKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Xls => "xls",
            Self::Xlsx => "xlsx",
        }
    }

    /// Classify from a file extension, `None` for anything else.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "html" | "htm" => Some(Self::Html),
            "xls" => Some(Self::Xls),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    /// Sniff the payload from its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&OLE2_MAGIC) {
            return Some(Self::Xls);
        }
        if bytes.starts_with(&ZIP_MAGIC) {
            return Some(Self::Xlsx);
        }
        let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
        let head = String::from_utf8_lossy(window).to_ascii_lowercase();
        if ["<html", "<!doctype", "<table", "<body"]
            .iter()
            .any(|marker| head.contains(marker))
        {
            return Some(Self::Html);
        }
        None
    }

    /// `Content-Type` header first, then magic bytes, then HTML.
    pub fn detect(content_type: Option<&str>, bytes: &[u8]) -> Self {
        let from_header = content_type.and_then(|ct| {
            let ct = ct.to_ascii_lowercase();
            if ct.contains("spreadsheetml") {
                Some(Self::Xlsx)
            } else if ct.contains("ms-excel") || ct.contains("excel") {
                Some(Self::Xls)
            } else if ct.contains("html") {
                Some(Self::Html)
            } else {
                None
            }
        });
        from_header
            .or_else(|| Self::sniff(bytes))
            .unwrap_or(Self::Html)
    }

    pub fn is_spreadsheet(self) -> bool {
        matches!(self, Self::Xls | Self::Xlsx)
    }
}

/// Create `dir` if needed and confirm files can be written inside it.
///
/// Failure is a configuration error: every later download would hit it.
pub async fn ensure_writable_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        AppError::config(format!("Cannot create directory {}: {e}", dir.display()))
    })?;

    let marker = dir.join(".write_check");
    tokio::fs::write(&marker, b"ok").await.map_err(|e| {
        AppError::config(format!("Directory {} is not writable: {e}", dir.display()))
    })?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}
