// src/models/task.rs

//! Per-location download task and its state machine.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::FetchError;
use crate::models::LocationNode;

/// Where a successful download ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredFile {
    /// New or changed content was written
    Written { path: PathBuf, bytes: u64 },
    /// Identical content already existed at the destination
    Duplicate { path: PathBuf },
}

impl StoredFile {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Written { path, .. } | Self::Duplicate { path } => path,
        }
    }
}

/// Lifecycle of a single download.
///
/// `Pending -> Attempting -> (Backoff -> Attempting)* -> Succeeded | Failed`
#[derive(Debug, Clone)]
pub enum TaskState {
    Pending,
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Succeeded(StoredFile),
    Failed(FetchError),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }
}

/// Final, countable result of a task.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    SkippedDuplicate { path: PathBuf },
    Failed { location: String, reason: String },
}

/// A location to fetch, created once per crawl.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub location: LocationNode,
    pub target_url: String,
    /// Province directory the file will be written into
    pub destination_dir: PathBuf,
    /// Number of requests issued so far
    pub attempt_count: u32,
    /// First task of its province in hierarchy order
    pub starts_province: bool,
    pub state: TaskState,
}

impl DownloadTask {
    pub fn new(location: LocationNode, target_url: String, destination_dir: PathBuf) -> Self {
        Self {
            location,
            target_url,
            destination_dir,
            attempt_count: 0,
            starts_province: false,
            state: TaskState::Pending,
        }
    }

    /// Convert a terminal state into its outcome. `None` while still running.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match &self.state {
            TaskState::Succeeded(StoredFile::Written { path, bytes }) => {
                Some(TaskOutcome::Downloaded {
                    path: path.clone(),
                    bytes: *bytes,
                })
            }
            TaskState::Succeeded(StoredFile::Duplicate { path }) => {
                Some(TaskOutcome::SkippedDuplicate { path: path.clone() })
            }
            TaskState::Failed(error) => Some(TaskOutcome::Failed {
                location: self.location.display_name(),
                reason: error.to_string(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;
    use crate::models::LocationInfo;

    fn task() -> DownloadTask {
        let node = LocationNode::new(
            &LocationInfo::new("1100", "서울특별시"),
            &LocationInfo::new("1101", "종로구"),
        );
        DownloadTask::new(node, "http://x/report".into(), PathBuf::from("out/1100"))
    }

    #[test]
    fn running_task_has_no_outcome() {
        let mut t = task();
        assert!(t.outcome().is_none());
        t.state = TaskState::Backoff {
            attempt: 1,
            delay: Duration::from_secs(2),
        };
        assert!(!t.state.is_terminal());
        assert!(t.outcome().is_none());
    }

    #[test]
    fn failed_task_reports_location() {
        let mut t = task();
        t.state = TaskState::Failed(FetchError::new(FetchErrorKind::NotFound, "gone"));
        match t.outcome() {
            Some(TaskOutcome::Failed { location, reason }) => {
                assert_eq!(location, "서울특별시 종로구");
                assert_eq!(reason, "not found: gone");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
