// src/error.rs

//! Unified error handling for the election pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for single remote requests.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Unified application error type.
///
/// Anything surfacing as an `AppError` from the crawler aborts the run.
/// Per-location network failures are [`FetchError`]s and are counted in the
/// crawl statistics instead.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or a request failed outside the retry loop
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSV reading or writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Spreadsheet decoding failed
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Required columns are missing from a tabular input
    #[error("Schema error in {context}: missing columns {}", .missing.join(", "))]
    Schema {
        context: String,
        missing: Vec<String>,
    },

    /// Parse error scoped to one payload
    #[error("Parse error for {context}: {message}")]
    Parse { context: String, message: String },

    /// Crawling error that prevents the crawl from continuing
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a schema error listing missing columns.
    pub fn schema(context: impl Into<String>, missing: Vec<String>) -> Self {
        Self::Schema {
            context: context.into(),
            missing,
        }
    }

    /// Create a parse error with context.
    pub fn parse(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a crawl error with context.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// Classification of a failed remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Request timed out
    Timeout,
    /// Connection refused, reset or dropped mid-body
    Connection,
    /// Server answered 5xx
    Server(u16),
    /// Server answered 429
    RateLimited,
    /// Server answered 404
    NotFound,
    /// Server answered 401 or 403
    Forbidden,
    /// Any other 4xx
    Client(u16),
    /// Request could not be built (bad URL, bad header)
    InvalidRequest,
    /// Response arrived but its body is unusable
    InvalidPayload,
}

impl FetchErrorKind {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection | Self::Server(_) | Self::RateLimited
        )
    }

    /// Classify an HTTP status code. Returns `None` for success codes.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=399 => None,
            401 | 403 => Some(Self::Forbidden),
            404 | 410 => Some(Self::NotFound),
            429 => Some(Self::RateLimited),
            400..=499 => Some(Self::Client(status)),
            _ => Some(Self::Server(status)),
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connection => write!(f, "connection error"),
            Self::Server(code) => write!(f, "server error {code}"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::NotFound => write!(f, "not found"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::Client(code) => write!(f, "client error {code}"),
            Self::InvalidRequest => write!(f, "invalid request"),
            Self::InvalidPayload => write!(f, "invalid payload"),
        }
    }
}

/// A failed remote request, tagged with its retry classification.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl fmt::Display) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            FetchErrorKind::Timeout
        } else if let Some(status) = error.status() {
            FetchErrorKind::from_status(status.as_u16()).unwrap_or(FetchErrorKind::InvalidPayload)
        } else if error.is_builder() {
            FetchErrorKind::InvalidRequest
        } else if error.is_decode() {
            FetchErrorKind::InvalidPayload
        } else {
            // connect, request and body errors all surface as broken transport
            FetchErrorKind::Connection
        };
        Self::new(kind, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(FetchErrorKind::from_status(200), None);
        assert_eq!(
            FetchErrorKind::from_status(503),
            Some(FetchErrorKind::Server(503))
        );
        assert_eq!(
            FetchErrorKind::from_status(429),
            Some(FetchErrorKind::RateLimited)
        );
        assert_eq!(
            FetchErrorKind::from_status(404),
            Some(FetchErrorKind::NotFound)
        );
        assert_eq!(
            FetchErrorKind::from_status(403),
            Some(FetchErrorKind::Forbidden)
        );
    }

    #[test]
    fn transient_kinds() {
        assert!(FetchErrorKind::Timeout.is_transient());
        assert!(FetchErrorKind::Connection.is_transient());
        assert!(FetchErrorKind::Server(502).is_transient());
        assert!(FetchErrorKind::RateLimited.is_transient());
        assert!(!FetchErrorKind::NotFound.is_transient());
        assert!(!FetchErrorKind::Forbidden.is_transient());
        assert!(!FetchErrorKind::InvalidRequest.is_transient());
        assert!(!FetchErrorKind::Client(400).is_transient());
    }

    #[test]
    fn schema_error_names_columns() {
        let err = AppError::schema("merged.csv", vec!["시도명".into(), "읍면동명".into()]);
        assert_eq!(
            err.to_string(),
            "Schema error in merged.csv: missing columns 시도명, 읍면동명"
        );
    }
}
