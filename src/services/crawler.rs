// src/services/crawler.rs

//! Election report crawler.
//!
//! Walks every leaf of the location hierarchy, downloads its report through
//! an [`ElectionPortal`] and stores it under the download directory. Each
//! location runs as a [`DownloadTask`] state machine:
//!
//! ```text
//! Pending -> Attempting -> Succeeded
//!               |  ^    \-> Failed
//!               v  |
//!             Backoff
//! ```
//!
//! Per-location failures end up in [`CrawlStats`]. Only configuration and
//! local I/O errors abort the crawl.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::error::{AppError, FetchError, FetchErrorKind, FetchResult, Result};
use crate::models::{
    Config, CrawlStats, DownloadTask, ElectionType, LocationNode, StoredFile, TaskState,
};
use crate::services::hierarchy::LocationHierarchy;
use crate::services::portal::{ElectionPortal, NecPortal, ReportPayload};
use crate::services::retry::{RateLimiter, RequestContext, RetryPolicy, Sleeper, TokioSleeper};
use crate::storage::{LocalStorage, Manifest, ReportStore};
use crate::utils::fs::{PayloadKind, ensure_writable_dir, sanitize_filename};
use crate::utils::report;

pub const CRAWL_STATS_FILE: &str = "crawl_stats.json";

const ERROR_MARKERS: [&str; 4] = ["exception", "not found", "오류가 발생", "잘못된 접근"];

/// Downloads the result report of every location of one election.
pub struct ElectionCrawler {
    election_id: String,
    election: ElectionType,
    portal: Arc<dyn ElectionPortal>,
    hierarchy: LocationHierarchy,
    storage: LocalStorage,
    limiter: RateLimiter,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    min_payload_bytes: u64,
}

impl ElectionCrawler {
    /// Crawler against the real portal with real sleeps.
    pub fn new(config: &Config) -> Result<Self> {
        let portal = Arc::new(NecPortal::new(config)?);
        Self::with_portal(config, portal, Arc::new(TokioSleeper))
    }

    /// Crawler with an injected portal and clock.
    pub fn with_portal(
        config: &Config,
        portal: Arc<dyn ElectionPortal>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let election = config.election_type()?;
        let retry = RetryPolicy::from_config(&config.retry);
        let hierarchy = LocationHierarchy::new(
            Arc::clone(&portal),
            retry.clone(),
            Arc::clone(&sleeper),
            config.hierarchy.provinces.clone(),
        );

        Ok(Self {
            election_id: config.election.id.clone(),
            election,
            portal,
            hierarchy,
            storage: LocalStorage::new(&config.paths.download_dir),
            limiter: RateLimiter::from_config(&config.crawler),
            retry,
            sleeper,
            min_payload_bytes: config.crawler.min_payload_bytes,
        })
    }

    pub fn election(&self) -> ElectionType {
        self.election
    }

    pub fn hierarchy(&self) -> &LocationHierarchy {
        &self.hierarchy
    }

    /// Crawl every location and return once all of them reached a final
    /// state.
    ///
    /// Sequential mode follows hierarchy order and pauses longer between
    /// provinces. Concurrent mode runs up to `max_workers` tasks at once,
    /// each observing the same per-request delay.
    pub async fn crawl_all_locations(
        &self,
        use_concurrent: bool,
        max_workers: usize,
    ) -> Result<CrawlStats> {
        if use_concurrent && max_workers == 0 {
            return Err(AppError::config("max_workers must be at least 1"));
        }
        ensure_writable_dir(self.storage.root()).await?;

        let started_at = Utc::now();
        let clock = Instant::now();
        report::header(&format!(
            "Crawling {} ({}) election {}",
            self.election.label(),
            self.election.code(),
            self.election_id
        ));

        let catalog = self.hierarchy.catalog(self.election).await?;
        let stats = CrawlStats::new();
        for failure in &catalog.failures {
            stats.record_error(&failure.location, &failure.reason);
        }

        let tasks = self.plan_tasks(&catalog.locations);
        log::info!(
            "{} locations to download ({})",
            tasks.len(),
            if use_concurrent {
                format!("concurrent, {max_workers} workers")
            } else {
                "sequential".to_string()
            }
        );

        let mut manifest = Manifest::default();
        let mut finish = |task: DownloadTask| {
            if let TaskState::Succeeded(stored) = &task.state {
                if let Ok(relative) = stored.path().strip_prefix(self.storage.root()) {
                    manifest.insert(relative, task.location.clone());
                }
            }
            if let Some(outcome) = task.outcome() {
                stats.record(&outcome);
            }
        };

        if use_concurrent {
            let mut results = stream::iter(tasks.into_iter().enumerate())
                .map(|(index, task)| {
                    let context = RequestContext {
                        is_first: index < max_workers,
                        starts_province: false,
                    };
                    self.run_task(task, context)
                })
                .buffer_unordered(max_workers);

            while let Some(result) = results.next().await {
                finish(result?);
            }
        } else {
            for (index, task) in tasks.into_iter().enumerate() {
                if task.starts_province {
                    report::separator();
                    log::info!(
                        "Province {} ({})",
                        task.location.province_name,
                        task.location.province_code
                    );
                }
                let context = RequestContext {
                    is_first: index == 0,
                    starts_province: task.starts_province,
                };
                finish(self.run_task(task, context).await?);
            }
        }

        manifest.merge_into(&self.storage).await?;
        self.storage
            .write_json(
                CRAWL_STATS_FILE,
                &serde_json::json!({
                    "election_id": self.election_id,
                    "election_code": self.election.code(),
                    "started_at": started_at,
                    "finished_at": Utc::now(),
                    "stats": stats.summary(),
                }),
            )
            .await?;

        let elapsed = clock.elapsed();
        report::summary(
            "Crawl",
            &[
                ("Attempted", stats.attempted().to_string()),
                ("Downloaded", stats.downloaded().to_string()),
                ("Skipped (unchanged)", stats.skipped_duplicate().to_string()),
                ("Errors", stats.errors().to_string()),
                ("Total size", report::human_bytes(stats.total_bytes())),
                ("Elapsed", format!("{:.1}s", elapsed.as_secs_f64())),
            ],
        );
        for entry in stats.error_entries() {
            report::sub_item(&format!("{}: {}", entry.location, entry.reason));
        }

        Ok(stats)
    }

    fn plan_tasks(&self, locations: &[LocationNode]) -> Vec<DownloadTask> {
        let target_url = self.portal.report_url();
        let mut previous: Option<&str> = None;

        locations
            .iter()
            .map(|location| {
                let mut task = DownloadTask::new(
                    location.clone(),
                    target_url.clone(),
                    self.storage.path(&location.province_code),
                );
                task.starts_province = previous != Some(location.province_code.as_str());
                previous = Some(location.province_code.as_str());
                task
            })
            .collect()
    }

    /// Drive one task to a terminal state. `Err` only for local I/O
    /// failures.
    async fn run_task(&self, mut task: DownloadTask, context: RequestContext) -> Result<DownloadTask> {
        self.sleeper
            .sleep(self.limiter.delay_before_request(context))
            .await;

        loop {
            task.attempt_count += 1;
            let attempt = task.attempt_count;
            task.state = TaskState::Attempting { attempt };
            log::debug!(
                "Downloading {} (attempt {attempt})",
                task.location.display_name()
            );

            match self.fetch(&task.location).await {
                Ok((payload, kind)) => {
                    let relative = report_relative_path(&task.location, &payload, kind);
                    let stored = self.storage.store(&relative, &payload.bytes).await?;
                    match &stored {
                        StoredFile::Written { bytes, .. } => log::info!(
                            "Downloaded {} -> {} ({})",
                            task.location.display_name(),
                            relative.display(),
                            report::human_bytes(*bytes)
                        ),
                        StoredFile::Duplicate { .. } => log::info!(
                            "Unchanged {} -> {}",
                            task.location.display_name(),
                            relative.display()
                        ),
                    }
                    task.state = TaskState::Succeeded(stored);
                }
                Err(error) if self.retry.should_retry(attempt, error.kind) => {
                    let delay = self.retry.backoff(attempt);
                    log::warn!(
                        "{} failed on attempt {attempt}/{}: {error}; retrying in {:.1}s",
                        task.location.display_name(),
                        self.retry.max_attempts(),
                        delay.as_secs_f64()
                    );
                    task.state = TaskState::Backoff { attempt, delay };
                    self.sleeper.sleep(delay).await;
                    continue;
                }
                Err(error) => {
                    log::error!(
                        "Giving up on {} after {attempt} attempt(s): {error}",
                        task.location.display_name()
                    );
                    task.state = TaskState::Failed(error);
                }
            }
            break;
        }
        Ok(task)
    }

    /// One request plus payload validation.
    async fn fetch(&self, location: &LocationNode) -> FetchResult<(ReportPayload, PayloadKind)> {
        let payload = self.portal.download_report(self.election, location).await?;

        let size = payload.bytes.len() as u64;
        if size < self.min_payload_bytes {
            return Err(FetchError::new(
                FetchErrorKind::InvalidPayload,
                format!(
                    "payload of {size} bytes is below the {} byte minimum",
                    self.min_payload_bytes
                ),
            ));
        }

        let kind = PayloadKind::detect(payload.content_type.as_deref(), &payload.bytes);
        if kind == PayloadKind::Html {
            let head = String::from_utf8_lossy(&payload.bytes[..payload.bytes.len().min(4096)])
                .to_lowercase();
            if let Some(marker) = ERROR_MARKERS.iter().find(|m| head.contains(*m)) {
                log::warn!(
                    "Report for {} may be an error page (contains '{marker}')",
                    location.display_name()
                );
            }
        }
        Ok((payload, kind))
    }
}

/// `<province_code>/<name>_<leaf_code>.<ext>` under the download root.
///
/// `<name>` is the server-provided filename without its extension; without
/// one the name falls back to `election_report_<codes>` and already ends in
/// the leaf code.
pub fn report_relative_path(
    location: &LocationNode,
    payload: &ReportPayload,
    kind: PayloadKind,
) -> PathBuf {
    let server_stem = payload
        .filename
        .as_deref()
        .map(sanitize_filename)
        .map(|name| strip_extension(&name).trim().to_string())
        .filter(|stem| !stem.is_empty());

    let file_name = match server_stem {
        Some(stem) => format!("{stem}_{}.{}", location.leaf_code(), kind.extension()),
        None => {
            let mut stem = format!(
                "election_report_{}_{}",
                location.province_code, location.district_code
            );
            if let Some(sub) = &location.subdistrict_code {
                stem.push('_');
                stem.push_str(sub);
            }
            format!("{stem}.{}", kind.extension())
        }
    };

    Path::new(&sanitize_filename(&location.province_code)).join(file_name)
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::models::LocationInfo;
    use crate::services::retry::RecordingSleeper;

    /// In-memory portal: two provinces, scripted failures per district.
    struct FakePortal {
        failures: Mutex<HashMap<String, Vec<FetchErrorKind>>>,
        downloads: AtomicUsize,
    }

    impl FakePortal {
        fn new() -> Self {
            Self {
                failures: Mutex::new(HashMap::new()),
                downloads: AtomicUsize::new(0),
            }
        }

        fn fail(self, district: &str, kinds: &[FetchErrorKind]) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(district.to_string(), kinds.to_vec());
            self
        }

        fn body(location: &LocationNode) -> Vec<u8> {
            let mut body = format!(
                "<html><body><table id=\"table01\"><tr><td>{}</td></tr></table>",
                location.display_name()
            )
            .into_bytes();
            body.resize(1024, b' ');
            body
        }
    }

    #[async_trait]
    impl ElectionPortal for FakePortal {
        async fn provinces(&self, _: ElectionType) -> FetchResult<Vec<LocationInfo>> {
            Ok(vec![
                LocationInfo::new("2600", "부산광역시"),
                LocationInfo::new("1100", "서울특별시"),
            ])
        }

        async fn districts(
            &self,
            _: ElectionType,
            province: &LocationInfo,
        ) -> FetchResult<Vec<LocationInfo>> {
            Ok((1..=3)
                .map(|i| LocationInfo::new(format!("{}{:02}", province.code, i), format!("{i}구")))
                .collect())
        }

        async fn constituencies(
            &self,
            _: ElectionType,
            _: &LocationInfo,
            _: &LocationInfo,
        ) -> FetchResult<Vec<LocationInfo>> {
            Ok(vec![])
        }

        async fn download_report(
            &self,
            _: ElectionType,
            location: &LocationNode,
        ) -> FetchResult<ReportPayload> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            let scripted = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&location.district_code)
                .and_then(|queue| (!queue.is_empty()).then(|| queue.remove(0)));
            if let Some(kind) = scripted {
                return Err(FetchError::new(kind, "scripted"));
            }
            Ok(ReportPayload {
                bytes: Self::body(location),
                content_type: Some("text/html;charset=UTF-8".into()),
                filename: Some("개표단위별 개표결과.xls".into()),
            })
        }

        fn report_url(&self) -> String {
            "http://localhost/report".into()
        }
    }

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.paths.download_dir = dir.to_path_buf();
        config.retry.base_delay_ms = 100;
        config.retry.max_delay_ms = 1000;
        config.retry.jitter = 0.0;
        config.crawler.request_jitter_ms = 0;
        config
    }

    fn crawler(dir: &Path, portal: FakePortal) -> (ElectionCrawler, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let crawler =
            ElectionCrawler::with_portal(&config(dir), Arc::new(portal), sleeper.clone()).unwrap();
        (crawler, sleeper)
    }

    fn files_under(dir: &Path) -> HashMap<PathBuf, Vec<u8>> {
        let mut files = HashMap::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            for entry in std::fs::read_dir(&current).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().is_some_and(|e| e == "html") {
                    let rel = path.strip_prefix(dir).unwrap().to_path_buf();
                    files.insert(rel, std::fs::read(&path).unwrap());
                }
            }
        }
        files
    }

    #[tokio::test]
    async fn sequential_and_concurrent_store_the_same_files() {
        let seq_dir = TempDir::new().unwrap();
        let (seq, _) = crawler(seq_dir.path(), FakePortal::new());
        let seq_stats = seq.crawl_all_locations(false, 1).await.unwrap();

        let con_dir = TempDir::new().unwrap();
        let (con, _) = crawler(con_dir.path(), FakePortal::new());
        let con_stats = con.crawl_all_locations(true, 4).await.unwrap();

        assert_eq!(seq_stats.downloaded(), 6);
        assert_eq!(con_stats.downloaded(), 6);
        assert_eq!(files_under(seq_dir.path()), files_under(con_dir.path()));
    }

    #[tokio::test]
    async fn rerun_skips_every_location() {
        let dir = TempDir::new().unwrap();
        let (first, _) = crawler(dir.path(), FakePortal::new());
        first.crawl_all_locations(false, 1).await.unwrap();

        let (second, _) = crawler(dir.path(), FakePortal::new());
        let stats = second.crawl_all_locations(true, 3).await.unwrap();
        assert_eq!(stats.attempted(), 6);
        assert_eq!(stats.downloaded(), 0);
        assert_eq!(stats.skipped_duplicate(), 6);
        assert_eq!(stats.total_bytes(), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_with_backoff() {
        let dir = TempDir::new().unwrap();
        let portal = FakePortal::new().fail(
            "110002",
            &[FetchErrorKind::Server(503), FetchErrorKind::Timeout],
        );
        let (crawler, sleeper) = crawler(dir.path(), portal);
        let stats = crawler.crawl_all_locations(false, 1).await.unwrap();

        assert_eq!(stats.downloaded(), 6);
        assert_eq!(stats.errors(), 0);
        let slept = sleeper.recorded();
        assert!(slept.contains(&Duration::from_millis(100)));
        assert!(slept.contains(&Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn exhausted_and_permanent_failures_are_recorded_once() {
        let dir = TempDir::new().unwrap();
        let portal = FakePortal::new()
            .fail("110001", &[FetchErrorKind::NotFound])
            .fail("260003", &[FetchErrorKind::Timeout; 5]);
        let (crawler, _) = crawler(dir.path(), portal);
        let stats = crawler.crawl_all_locations(true, 2).await.unwrap();

        assert_eq!(stats.attempted(), 6);
        assert_eq!(stats.downloaded(), 4);
        assert_eq!(stats.errors(), 2);
        let failed: HashSet<String> = stats
            .error_entries()
            .into_iter()
            .map(|e| e.location)
            .collect();
        assert!(failed.contains("서울특별시 1구"));
        assert!(failed.contains("부산광역시 3구"));
    }

    #[tokio::test]
    async fn sequential_mode_pauses_between_provinces() {
        let dir = TempDir::new().unwrap();
        let (crawler, sleeper) = crawler(dir.path(), FakePortal::new());
        crawler.crawl_all_locations(false, 1).await.unwrap();

        // 6 requests: the first is immediate, one crosses into 부산광역시
        let slept = sleeper.recorded();
        assert_eq!(slept.len(), 5);
        assert_eq!(
            slept.iter().filter(|d| **d == Duration::from_millis(3000)).count(),
            1
        );
        assert_eq!(
            slept.iter().filter(|d| **d == Duration::from_millis(1000)).count(),
            4
        );
    }

    #[tokio::test]
    async fn manifest_and_stats_are_written() {
        let dir = TempDir::new().unwrap();
        let (crawler, _) = crawler(dir.path(), FakePortal::new());
        crawler.crawl_all_locations(false, 1).await.unwrap();

        let storage = LocalStorage::new(dir.path());
        let manifest = Manifest::load(&storage).await.unwrap();
        assert_eq!(manifest.len(), 6);
        let node = manifest
            .get(Path::new("1100/개표단위별 개표결과_110001.html"))
            .unwrap();
        assert_eq!(node.district_name, "1구");
        assert!(dir.path().join(CRAWL_STATS_FILE).exists());
    }

    #[tokio::test]
    async fn unwritable_destination_aborts() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let (crawler, _) = crawler(&blocker.join("sub"), FakePortal::new());
        let err = crawler.crawl_all_locations(false, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn relative_path_uses_server_name_and_leaf_code() {
        let node = LocationNode::new(
            &LocationInfo::new("1100", "서울특별시"),
            &LocationInfo::new("1101", "종로구"),
        );
        let payload = ReportPayload {
            bytes: vec![],
            content_type: None,
            filename: Some("개표단위별/개표결과.xls".into()),
        };
        assert_eq!(
            report_relative_path(&node, &payload, PayloadKind::Html),
            PathBuf::from("1100/개표단위별_개표결과_1101.html")
        );

        let anonymous = ReportPayload {
            filename: None,
            ..payload
        };
        let council = node.with_subdistrict(&LocationInfo::new("5110101", "가선거구"));
        assert_eq!(
            report_relative_path(&council, &anonymous, PayloadKind::Xls),
            PathBuf::from("1100/election_report_1100_1101_5110101.xls")
        );
    }
}
