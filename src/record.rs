//! Index record types shared by the crawler, downloader and pipeline
//!
//! A `DomainRecord` points at a byte range inside a remote WARC file that holds one
//! captured HTTP transaction. A `DomainCrawl` is a single page-fetch work item
//! against one shard for one target.

use crate::crawler::Shard;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp layout used by the CDX API (`from`, `to` and record timestamps)
pub const CDX_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// A capture located by the index
///
/// `offset` and `length` describe the inclusive range
/// `offset ..= offset + length - 1` inside `filename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub filename: String,
    pub url: Option<String>,
    pub offset: u64,
    pub length: u64,
    pub digest: Option<String>,
    pub encoding: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl DomainRecord {
    /// Value of the HTTP `Range` header selecting exactly this record
    ///
    /// Returns None for zero-length records, which cannot be range-fetched.
    pub fn byte_range(&self) -> Option<String> {
        if self.length == 0 {
            return None;
        }
        let last = self.offset.checked_add(self.length - 1)?;
        Some(format!("bytes={}-{}", self.offset, last))
    }

    /// Returns true if the timestamp lies inside the optional `[since, to]` window
    ///
    /// Records without a timestamp only pass when no bound is set.
    pub fn within(&self, since: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
        if since.is_none() && to.is_none() {
            return true;
        }
        match self.timestamp {
            Some(ts) => since.map_or(true, |s| ts >= s) && to.map_or(true, |t| ts <= t),
            None => false,
        }
    }
}

/// CDX `matchType` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Prefix,
    Host,
    #[default]
    Domain,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Host => "host",
            Self::Domain => "domain",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "prefix" => Ok(Self::Prefix),
            "host" => Ok(Self::Host),
            "domain" => Ok(Self::Domain),
            other => Err(format!("unknown match type '{}'", other)),
        }
    }
}

/// One page-fetch task: `page` of `target`'s results on `shard`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCrawl {
    pub target: String,
    pub shard: Shard,
    pub page: u32,
    /// Scheduler-level retries already spent on this page
    pub retry: u32,
}

impl DomainCrawl {
    pub fn new(target: impl Into<String>, shard: Shard, page: u32) -> Self {
        Self {
            target: target.into(),
            shard,
            page,
            retry: 0,
        }
    }

    /// The same page, one retry later
    pub fn next_retry(&self) -> Self {
        Self {
            retry: self.retry + 1,
            ..self.clone()
        }
    }
}

/// Parses a CDX `YYYYMMDDhhmmss` timestamp
pub fn parse_cdx_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if ts.len() < 14 {
        return None;
    }
    NaiveDateTime::parse_from_str(&ts[..14], CDX_TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Formats a timestamp for the CDX `from`/`to` parameters
pub fn format_cdx_timestamp(dt: DateTime<Utc>) -> String {
    dt.format(CDX_TIMESTAMP_FORMAT).to_string()
}
