//! Index shard resolution
//!
//! CommonCrawl publishes one CDX server per crawl, e.g.
//! `https://index.commoncrawl.org/CC-MAIN-2024-10-index`. The crawl year is read
//! from the `MAIN-YYYY` part of the server name and used to skip shards outside
//! the requested time window.

use super::fetcher::{retrieve, HttpSession, RequestContext, RetryPolicy};
use crate::HarvestError;
use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

fn shard_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"MAIN-(\d{4})").expect("static shard pattern is valid"))
}

/// A CDX server for one crawl
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shard {
    pub url: String,
    pub year: i32,
}

impl Shard {
    /// Parses a CDX server URL, reading the crawl year from its last path segment
    ///
    /// # Returns
    ///
    /// * `Ok(Shard)` - The basename carries `MAIN-YYYY`
    /// * `Err(HarvestError::InvalidShard)` - It does not
    pub fn parse(url: &str) -> Result<Self, HarvestError> {
        let trimmed = url.trim().trim_end_matches('/');
        let basename = trimmed.rsplit('/').next().unwrap_or(trimmed);

        let year = shard_pattern()
            .captures(basename)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<i32>().ok())
            .ok_or_else(|| HarvestError::InvalidShard {
                shard: url.to_string(),
            })?;

        Ok(Self {
            url: trimmed.to_string(),
            year,
        })
    }

    /// Returns true if the crawl year lies within the years of `[since, to]`
    pub fn in_window(&self, since: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
        since.map_or(true, |s| self.year >= s.year()) && to.map_or(true, |t| self.year <= t.year())
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Parses every entry of an explicit shard list, failing on the first invalid one
pub fn parse_shards<S: AsRef<str>>(urls: &[S]) -> Result<Vec<Shard>, HarvestError> {
    urls.iter().map(|u| Shard::parse(u.as_ref())).collect()
}

/// Keeps shards whose year lies in the window, preserving order
pub fn filter_shards(
    shards: &[Shard],
    since: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Vec<Shard> {
    shards
        .iter()
        .filter(|s| s.in_window(since, to))
        .cloned()
        .collect()
}

/// Reads the `cdx-api` entries of a collection index document
fn shard_urls(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .filter_map(|entry| entry.get("cdx-api").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Fetches the list of CDX servers from a collection index (`collinfo.json`)
///
/// # Arguments
///
/// * `session` - Client and throttler to use
/// * `collinfo_url` - URL of the collection index document
/// * `policy` - Retry policy for the request
///
/// # Returns
///
/// * `Ok(Vec<Shard>)` - Every listed server, in document order
/// * `Err(HarvestError)` - The list could not be fetched, or an entry is invalid
pub async fn fetch_shards(
    session: &HttpSession,
    collinfo_url: &str,
    policy: &RetryPolicy,
) -> Result<Vec<Shard>, HarvestError> {
    let ctx = RequestContext::new("", collinfo_url);
    let values = retrieve(session, collinfo_url, &[], None, policy, &ctx)
        .await
        .map_err(|e| HarvestError::ShardResolution(e.to_string()))?;

    let urls = shard_urls(&values);
    if urls.is_empty() {
        return Err(HarvestError::ShardResolution(format!(
            "no cdx-api entries found at {}",
            collinfo_url
        )));
    }

    tracing::debug!(count = urls.len(), collinfo_url, "Resolved index shards");
    parse_shards(&urls)
}
