use crate::record::MatchType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Main configuration structure for cc-harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetEntry>,
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteEntry>,
    #[serde(default, rename = "extractor")]
    pub extractors: Vec<ExtractorEntry>,
}

impl Config {
    /// Target URLs/domains in declaration order
    pub fn target_urls(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.url.clone()).collect()
    }
}

/// Index aggregation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Explicit CDX servers; when empty they are read from `collection-index-url`
    #[serde(rename = "index-servers", default)]
    pub index_servers: Vec<String>,

    /// Collection index listing every crawl's CDX server
    #[serde(rename = "collection-index-url", default = "default_collection_index_url")]
    pub collection_index_url: String,

    /// How targets are matched by the index
    #[serde(rename = "match-type", default)]
    pub match_type: MatchType,

    /// Earliest capture time (inclusive)
    #[serde(default, deserialize_with = "deserialize_since")]
    pub since: Option<DateTime<Utc>>,

    /// Latest capture time (inclusive); a bare date covers the whole day
    #[serde(default, deserialize_with = "deserialize_to")]
    pub to: Option<DateTime<Utc>>,

    /// Maximum number of records to emit
    #[serde(default)]
    pub limit: Option<usize>,

    /// Extra target x shard pairs fetched ahead of consumption
    #[serde(rename = "prefetch-size", default = "default_prefetch_size")]
    pub prefetch_size: usize,

    /// Retries per index request / page
    #[serde(rename = "max-retry", default = "default_index_max_retry")]
    pub max_retry: u32,

    /// Exponential backoff base
    #[serde(rename = "sleep-base", default = "default_sleep_base")]
    pub sleep_base: f64,

    /// Backoff ceiling of the first retry (milliseconds)
    #[serde(rename = "sleep-unit-ms", default = "default_sleep_unit_ms")]
    pub sleep_unit_ms: u64,

    /// Minimum time between the starts of any two requests (milliseconds)
    #[serde(rename = "min-request-interval-ms", default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Whole-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// CDX `pageSize` parameter
    #[serde(rename = "page-size", default)]
    pub page_size: Option<u32>,

    /// CDX `filter` expressions, e.g. "status:200"
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            index_servers: Vec::new(),
            collection_index_url: default_collection_index_url(),
            match_type: MatchType::default(),
            since: None,
            to: None,
            limit: None,
            prefetch_size: default_prefetch_size(),
            max_retry: default_index_max_retry(),
            sleep_base: default_sleep_base(),
            sleep_unit_ms: default_sleep_unit_ms(),
            min_request_interval_ms: default_min_request_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            page_size: None,
            filters: Vec::new(),
        }
    }
}

/// WARC download configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DownloaderConfig {
    /// Prefix joined with each record's `filename`
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Check `WARC-Payload-Digest` against the payload
    #[serde(rename = "digest-verification", default)]
    pub digest_verification: bool,

    /// Forced payload encoding, overriding record and HTTP hints
    #[serde(default)]
    pub encoding: Option<String>,

    /// Downloads running at the same time
    #[serde(rename = "max-concurrent-downloads", default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    #[serde(rename = "max-retry", default = "default_download_max_retry")]
    pub max_retry: u32,

    #[serde(rename = "sleep-base", default = "default_sleep_base")]
    pub sleep_base: f64,

    #[serde(rename = "sleep-unit-ms", default = "default_sleep_unit_ms")]
    pub sleep_unit_ms: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            digest_verification: false,
            encoding: None,
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_retry: default_download_max_retry(),
            sleep_base: default_sleep_base(),
            sleep_unit_ms: default_sleep_unit_ms(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the harvester
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the harvester
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the harvester
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for harvester-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Root directory for streamed output
    pub directory: String,

    #[serde(default)]
    pub format: OutputFormat,

    /// Files per output directory
    #[serde(rename = "max-directory-size", default = "default_max_directory_size")]
    pub max_directory_size: usize,

    /// Records per JSON-lines file
    #[serde(rename = "max-file-size", default = "default_max_file_size")]
    pub max_file_size: usize,

    /// SQLite ledger of processed records; disabled when absent
    #[serde(rename = "ledger-path", default)]
    pub ledger_path: Option<String>,
}

/// How extracted documents are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Html,
}

/// A URL or domain to look up in the index
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEntry {
    pub url: String,
}

/// Maps URLs (and optionally a capture window) to an extractor
#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry {
    /// Regular expression matched against the record URL
    pub pattern: String,

    /// Name of the extractor to apply
    pub extractor: String,

    #[serde(default, deserialize_with = "deserialize_since")]
    pub since: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "deserialize_to")]
    pub to: Option<DateTime<Utc>>,
}

/// A named set of field extraction rules
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorEntry {
    pub name: String,

    /// HTTP statuses whose pages are extracted; others are filtered out
    #[serde(rename = "allowed-status", default = "default_allowed_status")]
    pub allowed_status: Vec<u16>,

    #[serde(default, rename = "field")]
    pub fields: Vec<FieldEntry>,
}

/// One output field selected from the page
#[derive(Debug, Clone, Deserialize)]
pub struct FieldEntry {
    pub name: String,

    /// CSS selector
    pub selector: String,

    /// Attribute to read instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,

    /// Collect every match into an array instead of taking the first
    #[serde(default)]
    pub multiple: bool,

    /// Filter the page out when this field is missing
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub transforms: Vec<TransformSpec>,
}

/// A text transformation applied to extracted values, in declaration order
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum TransformSpec {
    Trim,
    CollapseWhitespace,
    Lowercase,
    Uppercase,
    StripPrefix { value: String },
    StripSuffix { value: String },
    RegexReplace { pattern: String, replacement: String },
}

fn default_collection_index_url() -> String {
    "https://index.commoncrawl.org/collinfo.json".to_string()
}

fn default_base_url() -> String {
    "https://data.commoncrawl.org/".to_string()
}

fn default_prefetch_size() -> usize {
    2
}

fn default_index_max_retry() -> u32 {
    5
}

fn default_download_max_retry() -> u32 {
    3
}

fn default_sleep_base() -> f64 {
    1.5
}

fn default_sleep_unit_ms() -> u64 {
    1000
}

fn default_min_request_interval_ms() -> u64 {
    100
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent_downloads() -> usize {
    10
}

fn default_max_directory_size() -> usize {
    1000
}

fn default_max_file_size() -> usize {
    500
}

fn default_allowed_status() -> Vec<u16> {
    vec![200]
}

fn deserialize_since<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_date(deserializer, false)
}

fn deserialize_to<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_date(deserializer, true)
}

/// Accepts a quoted string or a native TOML date/datetime
fn deserialize_date<'de, D>(deserializer: D, end_of_day: bool) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<toml::Value> = Option::deserialize(deserializer)?;
    let text = match raw {
        None => return Ok(None),
        Some(toml::Value::String(s)) => s,
        Some(toml::Value::Datetime(dt)) => dt.to_string(),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a date, got {}",
                other.type_str()
            )))
        }
    };
    super::parser::parse_config_date(&text, end_of_day)
        .map(Some)
        .map_err(serde::de::Error::custom)
}
