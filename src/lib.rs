//! cc-harvest: CommonCrawl index aggregation and WARC extraction
//!
//! This crate discovers captures of target URLs/domains through CommonCrawl's CDX
//! index servers, prefetches the paginated index concurrently, and downloads and
//! extracts the archived pages behind each record.

pub mod config;
pub mod crawler;
pub mod download;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for cc-harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid shard '{shard}': expected a CDX server name containing MAIN-YYYY")]
    InvalidShard { shard: String },

    #[error("Failed to resolve CommonCrawl shards: {0}")]
    ShardResolution(String),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Routing error: {0}")]
    Route(#[from] pipeline::RouteError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern in config: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// How a failed request should be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection errors, timeouts and 500/502/503/504 answers
    Transient,
    /// Any other non-2xx status, unexpected content type or malformed body
    Fatal,
    /// Downloaded bytes do not match their declared digest or cannot be unwrapped
    Integrity,
}

/// Failure of a remote retrieval, after retries where they apply
///
/// `status` is the HTTP status of the last attempt, or 0 when no response was
/// received at all.
#[derive(Debug, Clone, Error)]
#[error("Download failed (status {status}): {reason}")]
pub struct DownloadError {
    pub reason: String,
    pub status: u16,
    pub kind: FailureKind,
}

impl DownloadError {
    pub fn transient(status: u16, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            status,
            kind: FailureKind::Transient,
        }
    }

    pub fn fatal(status: u16, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            status,
            kind: FailureKind::Fatal,
        }
    }

    pub fn integrity(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            status: 0,
            kind: FailureKind::Integrity,
        }
    }

    /// Returns true if repeating the request may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// Result type alias for cc-harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{AggregatorIterator, IndexAggregator};
pub use record::{DomainRecord, MatchType};
pub use state::SchedulerState;
pub use url::unify_url_id;
