//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ElectionType;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which election to download
    #[serde(default)]
    pub election: ElectionConfig,

    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Retry and backoff behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Remote portal endpoints
    #[serde(default)]
    pub portal: PortalConfig,

    /// Input/output locations for every pipeline stage
    #[serde(default)]
    pub paths: PathsConfig,

    /// Canonical province ordering
    #[serde(default)]
    pub hierarchy: HierarchyConfig,

    /// Rows dropped while merging
    #[serde(default)]
    pub merge: MergeConfig,

    /// Log verbosity
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration, or return the defaults if the file does not exist.
    ///
    /// A file that exists but cannot be read or parsed is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the configured election code.
    pub fn election_type(&self) -> Result<ElectionType> {
        ElectionType::try_from(self.election.code)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.election.id.trim().is_empty() {
            return Err(AppError::validation("election.id is empty"));
        }
        self.election_type()?;
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_workers == 0 {
            return Err(AppError::validation("crawler.max_workers must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be > 0"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(AppError::validation(
                "retry.max_delay_ms must be >= retry.base_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(AppError::validation("retry.jitter must be within 0.0..=1.0"));
        }
        url::Url::parse(&self.portal.base_url)
            .map_err(|e| AppError::validation(format!("portal.base_url is invalid: {e}")))?;
        if self.hierarchy.provinces.is_empty() {
            return Err(AppError::validation("No canonical provinces defined"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            election: ElectionConfig::default(),
            crawler: CrawlerConfig::default(),
            retry: RetryConfig::default(),
            portal: PortalConfig::default(),
            paths: PathsConfig::default(),
            hierarchy: HierarchyConfig::default(),
            merge: MergeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Election selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Portal election identifier (e.g. "0020250603")
    #[serde(default = "defaults::election_id")]
    pub id: String,

    /// Election type code, 1 through 8
    #[serde(default = "defaults::election_code")]
    pub code: u8,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            id: defaults::election_id(),
            code: defaults::election_code(),
        }
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay before every report request in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Uniform jitter applied around `request_delay_ms`
    #[serde(default = "defaults::request_jitter")]
    pub request_jitter_ms: u64,

    /// Extra pause when moving on to the next province
    #[serde(default = "defaults::province_delay")]
    pub province_delay_ms: u64,

    /// Run downloads on a worker pool instead of one by one
    #[serde(default)]
    pub concurrent: bool,

    /// Worker pool size for concurrent mode
    #[serde(default = "defaults::max_workers")]
    pub max_workers: usize,

    /// Payloads smaller than this are treated as failed downloads
    #[serde(default = "defaults::min_payload_bytes")]
    pub min_payload_bytes: u64,
}

impl CrawlerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_jitter(&self) -> Duration {
        Duration::from_millis(self.request_jitter_ms)
    }

    pub fn province_delay(&self) -> Duration {
        Duration::from_millis(self.province_delay_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            request_jitter_ms: defaults::request_jitter(),
            province_delay_ms: defaults::province_delay(),
            concurrent: false,
            max_workers: defaults::max_workers(),
            min_payload_bytes: defaults::min_payload_bytes(),
        }
    }
}

/// Retry/backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, first try included
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles afterwards
    #[serde(default = "defaults::retry_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on the exponential part of the backoff
    #[serde(default = "defaults::retry_max_delay")]
    pub max_delay_ms: u64,

    /// Relative jitter, e.g. 0.5 scales the backoff by a factor in [0.5, 1.5]
    #[serde(default = "defaults::retry_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::retry_base_delay(),
            max_delay_ms: defaults::retry_max_delay(),
            jitter: defaults::retry_jitter(),
        }
    }
}

/// Portal endpoints, relative to `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Page carrying the province `<select>`
    #[serde(default = "defaults::document_path")]
    pub document_path: String,

    /// JSON catalog of districts per province
    #[serde(default = "defaults::town_catalog_path")]
    pub town_catalog_path: String,

    /// JSON catalog of constituencies per district (council elections)
    #[serde(default = "defaults::constituency_catalog_path")]
    pub constituency_catalog_path: String,

    /// Report export endpoint
    #[serde(default = "defaults::report_path")]
    pub report_path: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            document_path: defaults::document_path(),
            town_catalog_path: defaults::town_catalog_path(),
            constituency_catalog_path: defaults::constituency_catalog_path(),
            report_path: defaults::report_path(),
        }
    }
}

/// File system locations for pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "defaults::download_dir")]
    pub download_dir: PathBuf,

    #[serde(default = "defaults::csv_dir")]
    pub csv_dir: PathBuf,

    #[serde(default = "defaults::merged_file")]
    pub merged_file: PathBuf,

    #[serde(default = "defaults::aggregate_dir")]
    pub aggregate_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            download_dir: defaults::download_dir(),
            csv_dir: defaults::csv_dir(),
            merged_file: defaults::merged_file(),
            aggregate_dir: defaults::aggregate_dir(),
        }
    }
}

/// A province in canonical crawl order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvinceEntry {
    pub code: String,
    pub name: String,
}

/// Canonical administrative ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default = "defaults::provinces")]
    pub provinces: Vec<ProvinceEntry>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            provinces: defaults::provinces(),
        }
    }
}

/// Summary rows removed from the merged dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Town labels that mark totals rather than places
    #[serde(default = "defaults::excluded_towns")]
    pub excluded_towns: Vec<String>,

    /// Precinct labels that mark subtotals
    #[serde(default = "defaults::excluded_precincts")]
    pub excluded_precincts: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            excluded_towns: defaults::excluded_towns(),
            excluded_precincts: defaults::excluded_precincts(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// env_logger filter level (error, warn, info, debug, trace)
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::ProvinceEntry;

    // Election defaults
    pub fn election_id() -> String {
        "0020250603".into()
    }
    pub fn election_code() -> u8 {
        1
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn request_jitter() -> u64 {
        200
    }
    pub fn province_delay() -> u64 {
        2000
    }
    pub fn max_workers() -> usize {
        3
    }
    pub fn min_payload_bytes() -> u64 {
        512
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn retry_base_delay() -> u64 {
        2000
    }
    pub fn retry_max_delay() -> u64 {
        60_000
    }
    pub fn retry_jitter() -> f64 {
        0.5
    }

    // Portal defaults
    pub fn base_url() -> String {
        "http://info.nec.go.kr".into()
    }
    pub fn document_path() -> String {
        "/main/showDocument.xhtml".into()
    }
    pub fn town_catalog_path() -> String {
        "/bizcommon/selectbox/selectbox_townCodeJson.json".into()
    }
    pub fn constituency_catalog_path() -> String {
        "/bizcommon/selectbox/selectbox_getSggCityCodeJson.json".into()
    }
    pub fn report_path() -> String {
        "/electioninfo/electionInfo_report.xhtml".into()
    }

    // Path defaults
    pub fn download_dir() -> PathBuf {
        "election_results".into()
    }
    pub fn csv_dir() -> PathBuf {
        "csv_results".into()
    }
    pub fn merged_file() -> PathBuf {
        "merged_election_results.csv".into()
    }
    pub fn aggregate_dir() -> PathBuf {
        "aggregated_results".into()
    }

    // Merge defaults
    pub fn excluded_towns() -> Vec<String> {
        vec!["합계".into(), "잘못 투입·구분된 투표지".into()]
    }
    pub fn excluded_precincts() -> Vec<String> {
        vec!["소계".into()]
    }

    pub fn log_level() -> String {
        "info".into()
    }

    // Canonical province order
    pub fn provinces() -> Vec<ProvinceEntry> {
        [
            ("1100", "서울특별시"),
            ("2600", "부산광역시"),
            ("2700", "대구광역시"),
            ("2800", "인천광역시"),
            ("2900", "광주광역시"),
            ("3000", "대전광역시"),
            ("3100", "울산광역시"),
            ("5100", "세종특별자치시"),
            ("4100", "경기도"),
            ("5200", "강원특별자치도"),
            ("4300", "충청북도"),
            ("4400", "충청남도"),
            ("5300", "전북특별자치도"),
            ("4600", "전라남도"),
            ("4700", "경상북도"),
            ("4800", "경상남도"),
            ("4900", "제주특별자치도"),
        ]
        .into_iter()
        .map(|(code, name)| ProvinceEntry {
            code: code.to_string(),
            name: name.to_string(),
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.crawler.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_election_code() {
        let mut config = Config::default();
        config.election.code = 9;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [election]
            code = 6

            [crawler]
            concurrent = true
            max_workers = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.election.code, 6);
        assert_eq!(config.election.id, "0020250603");
        assert!(config.crawler.concurrent);
        assert_eq!(config.crawler.max_workers, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.hierarchy.provinces.len(), 17);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(dir.path().join("election.toml")).unwrap();
        assert_eq!(config.election.id, "0020250603");
    }

    #[test]
    fn malformed_file_is_not_replaced_by_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("election.toml");
        fs::write(&path, "[election]\ncode = 300\n").unwrap();
        assert!(matches!(Config::load_or_default(&path), Err(AppError::Toml(_))));

        fs::write(&path, "[election]\ncode = 6\n").unwrap();
        assert_eq!(Config::load_or_default(&path).unwrap().election.code, 6);
    }
}
