//! CDX index page source
//!
//! Issues the two kinds of CDX API requests:
//! - `showNumPages=true` probes returning how many result pages a target has on a shard
//! - page fetches returning one page of capture records as NDJSON

use super::fetcher::{retrieve, HttpSession, RequestContext, RetryPolicy, NDJSON_CONTENT_TYPE};
use super::shard::Shard;
use crate::record::{format_cdx_timestamp, parse_cdx_timestamp, DomainCrawl, DomainRecord, MatchType};
use crate::DownloadError;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Parameters shared by every request for one aggregation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexQuery {
    pub match_type: MatchType,
    pub since: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// CDX `filter` expressions, e.g. `status:200` or `!mime:image/.*`
    pub filters: Vec<String>,
    pub page_size: Option<u32>,
}

impl IndexQuery {
    /// Query parameters common to probes and page fetches
    pub fn params(&self, target: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("output", "json".to_string()),
            ("matchType", self.match_type.as_str().to_string()),
            ("url", target.to_string()),
        ];
        if let Some(since) = self.since {
            params.push(("from", format_cdx_timestamp(since)));
        }
        if let Some(to) = self.to {
            params.push(("to", format_cdx_timestamp(to)));
        }
        if let Some(size) = self.page_size {
            params.push(("pageSize", size.to_string()));
        }
        for filter in &self.filters {
            params.push(("filter", filter.clone()));
        }
        params
    }
}

fn is_no_captures(err: &DownloadError) -> bool {
    err.status == 404 && !err.is_retryable()
}

/// Reads an integer that the CDX server may send as a number or a string
fn as_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Converts one CDX JSON line into a record
///
/// Lines without a `filename` cannot be downloaded and yield None.
pub fn record_from_value(value: &Value) -> Option<DomainRecord> {
    let filename = as_string(value.get("filename"))?;
    Some(DomainRecord {
        filename,
        url: as_string(value.get("url")),
        offset: as_u64(value.get("offset")).unwrap_or(0),
        length: as_u64(value.get("length")).unwrap_or(0),
        digest: as_string(value.get("digest")),
        encoding: as_string(value.get("encoding")),
        timestamp: value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_cdx_timestamp),
    })
}

/// Asks a shard how many result pages `target` has
///
/// # Returns
///
/// * `Ok(n)` - The shard reported `n` pages; `Ok(0)` also covers a 404 "no captures" answer
/// * `Err(DownloadError)` - The probe failed after retries
pub async fn get_number_of_pages(
    session: &HttpSession,
    shard: &Shard,
    target: &str,
    query: &IndexQuery,
    policy: &RetryPolicy,
) -> Result<u32, DownloadError> {
    let mut params = query.params(target);
    params.push(("showNumPages", "true".to_string()));
    let ctx = RequestContext::new(target, shard.url.as_str());

    let values = match retrieve(
        session,
        &shard.url,
        &params,
        Some(NDJSON_CONTENT_TYPE),
        policy,
        &ctx,
    )
    .await
    {
        Ok(values) => values,
        Err(err) if is_no_captures(&err) => {
            tracing::debug!(site = target, shard = %shard, "No captures on shard");
            return Ok(0);
        }
        Err(err) => return Err(err),
    };

    let Some(first) = values.first() else {
        return Ok(0);
    };

    let pages = as_u64(first.get("pages")).ok_or_else(|| {
        DownloadError::fatal(200, format!("page count response without 'pages': {}", first))
    })?;
    let pages = u32::try_from(pages)
        .map_err(|_| DownloadError::fatal(200, format!("page count out of range: {}", pages)))?;

    tracing::debug!(site = target, shard = %shard, pages, "Probed page count");
    Ok(pages)
}

/// Fetches one page of records
///
/// A 404 answer means the page holds no captures and yields an empty list.
/// Records stamped outside `[since, to]` are dropped.
pub async fn fetch_page(
    session: &HttpSession,
    crawl: &DomainCrawl,
    query: &IndexQuery,
    policy: &RetryPolicy,
) -> Result<Vec<DomainRecord>, DownloadError> {
    let mut params = query.params(&crawl.target);
    params.push(("page", crawl.page.to_string()));
    let ctx = RequestContext::new(crawl.target.as_str(), crawl.shard.url.as_str())
        .with_page(crawl.page, crawl.retry);

    let values = match retrieve(
        session,
        &crawl.shard.url,
        &params,
        Some(NDJSON_CONTENT_TYPE),
        policy,
        &ctx,
    )
    .await
    {
        Ok(values) => values,
        Err(err) if is_no_captures(&err) => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let total = values.len();
    let records: Vec<DomainRecord> = values
        .iter()
        .filter_map(record_from_value)
        .filter(|r| r.within(query.since, query.to))
        .collect();

    tracing::debug!(
        site = %crawl.target,
        shard = %crawl.shard,
        page = crawl.page,
        retry = crawl.retry,
        lines = total,
        records = records.len(),
        "Fetched index page"
    );
    Ok(records)
}

/// Fetches one page, logging a failure and returning no records instead of an error
pub async fn get_captured_responses(
    session: &HttpSession,
    crawl: &DomainCrawl,
    query: &IndexQuery,
    policy: &RetryPolicy,
) -> Vec<DomainRecord> {
    match fetch_page(session, crawl, query, policy).await {
        Ok(records) => records,
        Err(err) => {
            tracing::warn!(
                site = %crawl.target,
                shard = %crawl.shard,
                page = crawl.page,
                status = err.status,
                "Dropping index page: {}",
                err.reason
            );
            Vec::new()
        }
    }
}
