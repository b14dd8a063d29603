//! HTTP fetcher implementation
//!
//! This module handles every remote request made by the harvester:
//! - Building the HTTP client with a descriptive user agent
//! - Routing each attempt through the shared `Throttler`
//! - Retrying transient failures with randomized exponential backoff
//! - Classifying failures as transient or fatal
//! - Decoding newline-delimited JSON bodies

use super::throttle::Throttler;
use crate::config::UserAgentConfig;
use crate::DownloadError;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Content type served by the CDX API for `output=json`
pub const NDJSON_CONTENT_TYPE: &str = "text/x-ndjson";

/// Statuses worth repeating a request for
const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Result of one successful HTTP attempt
#[derive(Debug, Clone)]
pub struct RetrieveResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// How many times to repeat a failing request and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt
    pub max_retry: u32,
    /// Exponential growth factor of the backoff ceiling
    pub sleep_base: f64,
    /// Backoff ceiling for attempt 0
    pub sleep_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retry: u32, sleep_base: f64, sleep_unit: Duration) -> Self {
        Self {
            max_retry,
            sleep_base,
            sleep_unit,
        }
    }

    /// A policy that makes exactly one attempt
    pub fn single() -> Self {
        Self::new(0, 1.0, Duration::ZERO)
    }

    /// Total number of attempts this policy allows
    pub fn attempts(&self) -> u32 {
        self.max_retry.saturating_add(1)
    }

    /// Random sleep in `[0, sleep_base^attempt * sleep_unit)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling =
            self.sleep_base.powi(attempt.min(i32::MAX as u32) as i32) * self.sleep_unit.as_secs_f64();
        if !ceiling.is_finite() || ceiling <= 0.0 {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..ceiling);
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 1.5, Duration::from_secs(1))
    }
}

/// HTTP client plus the throttler shared by every request it makes
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
    throttler: Arc<Throttler>,
}

impl HttpSession {
    pub fn new(client: Client, throttler: Arc<Throttler>) -> Self {
        Self { client, throttler }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn throttler(&self) -> &Arc<Throttler> {
        &self.throttler
    }
}

/// Log fields describing who issued a request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub target: String,
    pub shard: String,
    pub page: Option<u32>,
    pub retry: u32,
}

impl RequestContext {
    pub fn new(target: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            shard: shard.into(),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: u32, retry: u32) -> Self {
        self.page = Some(page);
        self.retry = retry;
        self
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Whole-request timeout; timeouts count as retryable failures
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Maps a client error onto the failure taxonomy
fn classify_error(err: &reqwest::Error) -> DownloadError {
    let status = err.status().map(|s| s.as_u16()).unwrap_or(0);
    if err.is_builder() || err.is_redirect() {
        DownloadError::fatal(status, err.to_string())
    } else if err.is_timeout() {
        DownloadError::transient(status, format!("request timed out: {}", err))
    } else if err.is_connect() {
        DownloadError::transient(status, format!("connection failed: {}", err))
    } else {
        DownloadError::transient(status, err.to_string())
    }
}

fn classify_status(status: StatusCode) -> Option<DownloadError> {
    if status.is_success() {
        return None;
    }
    let code = status.as_u16();
    let reason = status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", code));
    if RETRYABLE_STATUSES.contains(&code) {
        Some(DownloadError::transient(code, reason))
    } else {
        Some(DownloadError::fatal(code, reason))
    }
}

/// Makes a single throttled attempt
async fn send_once(
    session: &HttpSession,
    url: &str,
    query: &[(&str, String)],
    headers: &[(&str, String)],
) -> Result<RetrieveResponse, DownloadError> {
    let mut request = session.client.get(url);
    if !query.is_empty() {
        request = request.query(query);
    }
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }

    let response = session
        .throttler
        .throttle(request.send())
        .await
        .map_err(|e| classify_error(&e))?;

    let status = response.status();
    if let Some(err) = classify_status(status) {
        return Err(err);
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response.bytes().await.map_err(|e| {
        DownloadError::transient(status.as_u16(), format!("failed to read body: {}", e))
    })?;

    Ok(RetrieveResponse {
        status: status.as_u16(),
        content_type,
        body: body.to_vec(),
    })
}

/// Fetches a URL, retrying transient failures
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | HTTP 2xx | Return response |
/// | HTTP 500/502/503/504 | Retry after backoff |
/// | Timeout / connection error / body read error | Retry after backoff |
/// | Any other status | Fail immediately |
///
/// At most `policy.max_retry + 1` attempts are made.
///
/// # Arguments
///
/// * `session` - Client and throttler to use
/// * `url` - The URL to fetch
/// * `query` - Query parameters, repeated keys allowed
/// * `headers` - Extra request headers
/// * `policy` - Retry policy
/// * `ctx` - Fields attached to every log line
pub async fn fetch_with_retry(
    session: &HttpSession,
    url: &str,
    query: &[(&str, String)],
    headers: &[(&str, String)],
    policy: &RetryPolicy,
    ctx: &RequestContext,
) -> Result<RetrieveResponse, DownloadError> {
    let mut attempt: u32 = 0;
    loop {
        match send_once(session, url, query, headers).await {
            Ok(response) => {
                tracing::trace!(
                    url,
                    attempt,
                    status = response.status,
                    bytes = response.body.len(),
                    "Request succeeded"
                );
                return Ok(response);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_retry => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    url,
                    attempt,
                    status = err.status,
                    site = %ctx.target,
                    shard = %ctx.shard,
                    page = ?ctx.page,
                    retry = ctx.retry,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying: {}",
                    err.reason
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(
                    url,
                    attempt,
                    status = err.status,
                    site = %ctx.target,
                    shard = %ctx.shard,
                    page = ?ctx.page,
                    retry = ctx.retry,
                    "Request failed: {}",
                    err.reason
                );
                return Err(err);
            }
        }
    }
}

/// Fetches a URL and decodes its newline-delimited JSON body
///
/// A content type not starting with `expected_content_type` and a body that is
/// not valid NDJSON are both fatal and never retried.
pub async fn retrieve(
    session: &HttpSession,
    url: &str,
    query: &[(&str, String)],
    expected_content_type: Option<&str>,
    policy: &RetryPolicy,
    ctx: &RequestContext,
) -> Result<Vec<Value>, DownloadError> {
    let response = fetch_with_retry(session, url, query, &[], policy, ctx).await?;

    if let Some(expected) = expected_content_type {
        let actual = response.content_type.as_deref().unwrap_or("");
        if !actual.to_ascii_lowercase().starts_with(&expected.to_ascii_lowercase()) {
            tracing::warn!(
                url,
                site = %ctx.target,
                shard = %ctx.shard,
                page = ?ctx.page,
                expected,
                actual,
                "Unexpected content type"
            );
            return Err(DownloadError::fatal(
                response.status,
                format!("expected content type {}, got '{}'", expected, actual),
            ));
        }
    }

    decode_ndjson(&response.body).map_err(|e| {
        tracing::warn!(
            url,
            site = %ctx.target,
            shard = %ctx.shard,
            page = ?ctx.page,
            "Malformed NDJSON body: {}",
            e
        );
        DownloadError::fatal(response.status, format!("malformed JSON body: {}", e))
    })
}

/// Fetches raw bytes, retrying transient failures
pub async fn retrieve_bytes(
    session: &HttpSession,
    url: &str,
    headers: &[(&str, String)],
    policy: &RetryPolicy,
    ctx: &RequestContext,
) -> Result<Vec<u8>, DownloadError> {
    fetch_with_retry(session, url, &[], headers, policy, ctx)
        .await
        .map(|r| r.body)
}

/// Decodes a body of whitespace-separated JSON values
pub fn decode_ndjson(body: &[u8]) -> Result<Vec<Value>, serde_json::Error> {
    serde_json::Deserializer::from_slice(body)
        .into_iter::<Value>()
        .collect()
}
