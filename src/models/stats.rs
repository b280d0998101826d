// src/models/stats.rs

//! Crawl statistics shared across download workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::models::TaskOutcome;

/// A location that could not be downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlErrorEntry {
    pub location: String,
    pub reason: String,
}

/// Process-wide crawl counters.
///
/// Mutated only through [`CrawlStats::record`] and
/// [`CrawlStats::record_error`], both safe to call from concurrent workers.
#[derive(Debug, Default)]
pub struct CrawlStats {
    attempted: AtomicU64,
    downloaded: AtomicU64,
    skipped_duplicate: AtomicU64,
    errors: AtomicU64,
    total_bytes: AtomicU64,
    error_entries: Mutex<Vec<CrawlErrorEntry>>,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one finished download task.
    pub fn record(&self, outcome: &TaskOutcome) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        match outcome {
            TaskOutcome::Downloaded { bytes, .. } => {
                self.downloaded.fetch_add(1, Ordering::Relaxed);
                self.total_bytes.fetch_add(*bytes, Ordering::Relaxed);
            }
            TaskOutcome::SkippedDuplicate { .. } => {
                self.skipped_duplicate.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Failed { location, reason } => {
                self.push_error(location, reason);
            }
        }
    }

    /// Account for a failure that happened outside a download task,
    /// e.g. a district catalog that could not be fetched.
    pub fn record_error(&self, location: impl Into<String>, reason: impl Into<String>) {
        self.push_error(&location.into(), &reason.into());
    }

    fn push_error(&self, location: &str, reason: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.error_entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CrawlErrorEntry {
                location: location.to_string(),
                reason: reason.to_string(),
            });
    }

    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn skipped_duplicate(&self) -> u64 {
        self.skipped_duplicate.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn error_entries(&self) -> Vec<CrawlErrorEntry> {
        self.error_entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_errors(&self) -> bool {
        self.errors() > 0
    }

    /// Plain copy of the counters, for reporting and `crawl_stats.json`.
    pub fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            attempted: self.attempted(),
            downloaded: self.downloaded(),
            skipped_duplicate: self.skipped_duplicate(),
            errors: self.errors(),
            total_bytes: self.total_bytes(),
            error_entries: self.error_entries(),
        }
    }
}

/// Serializable snapshot of [`CrawlStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub attempted: u64,
    pub downloaded: u64,
    pub skipped_duplicate: u64,
    pub errors: u64,
    pub total_bytes: u64,
    pub error_entries: Vec<CrawlErrorEntry>,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn record_counts_each_outcome_once() {
        let stats = CrawlStats::new();
        stats.record(&TaskOutcome::Downloaded {
            path: PathBuf::from("a.html"),
            bytes: 1000,
        });
        stats.record(&TaskOutcome::SkippedDuplicate {
            path: PathBuf::from("b.html"),
        });
        stats.record(&TaskOutcome::Failed {
            location: "서울특별시 종로구".into(),
            reason: "timeout".into(),
        });

        assert_eq!(stats.attempted(), 3);
        assert_eq!(stats.downloaded(), 1);
        assert_eq!(stats.skipped_duplicate(), 1);
        assert_eq!(stats.errors(), 1);
        assert_eq!(stats.total_bytes(), 1000);
        assert_eq!(stats.error_entries()[0].reason, "timeout");
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let stats = Arc::new(CrawlStats::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        if i % 5 == 0 {
                            stats.record(&TaskOutcome::Failed {
                                location: format!("w{worker}"),
                                reason: "x".into(),
                            });
                        } else {
                            stats.record(&TaskOutcome::Downloaded {
                                path: PathBuf::from("f"),
                                bytes: 2,
                            });
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.attempted(), 4000);
        assert_eq!(stats.errors(), 800);
        assert_eq!(stats.downloaded(), 3200);
        assert_eq!(stats.total_bytes(), 6400);
        assert_eq!(stats.error_entries().len(), 800);
    }

    #[test]
    fn catalog_errors_do_not_count_as_attempts() {
        let stats = CrawlStats::new();
        stats.record_error("부산광역시", "district catalog unavailable");
        assert_eq!(stats.attempted(), 0);
        assert_eq!(stats.errors(), 1);
        assert!(stats.has_errors());
    }
}
