//! Mock server fixtures shared by the integration tests

use cc_harvest::crawler::{
    AggregatorOptions, HttpSession, IndexQuery, RetryPolicy, Throttler, NDJSON_CONTENT_TYPE,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const WARC_FILE: &str = "crawl-data/CC-MAIN-2022-05/segments/1/warc/test.warc.gz";

/// Session without request spacing
pub fn session() -> HttpSession {
    HttpSession::new(reqwest::Client::new(), Arc::new(Throttler::disabled()))
}

/// Retry policy with millisecond backoff
pub fn fast_retry(max_retry: u32) -> RetryPolicy {
    RetryPolicy::new(max_retry, 1.0, Duration::from_millis(2))
}

pub fn options(limit: Option<usize>) -> AggregatorOptions {
    AggregatorOptions {
        query: IndexQuery::default(),
        retry: fast_retry(5),
        limit,
        prefetch_size: 2,
    }
}

pub fn shard_url(server: &MockServer, name: &str) -> String {
    format!("{}/{}", server.uri(), name)
}

/// One CDX result line
pub fn cdx_line(url: &str, timestamp: &str, offset: u64) -> Value {
    json!({
        "urlkey": url,
        "timestamp": timestamp,
        "url": url,
        "mime": "text/html",
        "status": "200",
        "digest": "3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ",
        "length": "100",
        "offset": offset.to_string(),
        "filename": WARC_FILE,
    })
}

/// `count` distinct lines for page `page`
pub fn page_lines(page: u32, count: u64) -> Vec<Value> {
    (0..count)
        .map(|i| {
            cdx_line(
                &format!("https://example.com/p{}/{}", page, i),
                "20220315120000",
                u64::from(page) * 1000 + i * 100,
            )
        })
        .collect()
}

pub fn ndjson_response(lines: &[Value]) -> ResponseTemplate {
    let body = lines
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    ResponseTemplate::new(200).set_body_raw(body, NDJSON_CONTENT_TYPE)
}

pub fn pages_response(pages: u32) -> ResponseTemplate {
    ndjson_response(&[json!({"pages": pages, "pageSize": 5, "blocks": pages})])
}

/// Mounts a shard answering the page-count probe and every page
pub async fn mount_shard(server: &MockServer, name: &str, pages: &[Vec<Value>]) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", name)))
        .and(query_param("showNumPages", "true"))
        .respond_with(pages_response(pages.len() as u32))
        .mount(server)
        .await;

    for (page, lines) in pages.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(format!("/{}", name)))
            .and(query_param("page", page.to_string()))
            .respond_with(ndjson_response(lines))
            .mount(server)
            .await;
    }
}

/// Number of received requests whose query contains `key=value`
pub async fn count_requests(server: &MockServer, key: &str, value: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| {
            request
                .url
                .query_pairs()
                .any(|(k, v)| k == key && v == value)
        })
        .count()
}

/// Number of received requests for `path`
pub async fn count_path(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == request_path)
        .count()
}

/// Replays `responses` in order, repeating the last one
pub struct Sequence {
    responses: Vec<ResponseTemplate>,
    hits: AtomicUsize,
}

impl Sequence {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        Self {
            responses,
            hits: AtomicUsize::new(0),
        }
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let hit = self.hits.fetch_add(1, Ordering::SeqCst);
        self.responses[hit.min(self.responses.len() - 1)].clone()
    }
}

/// A WARC record with a complete header block
pub fn warc_record(rec_type: &str, uri: &str, extra_headers: &str, block: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "WARC/1.0\r\nWARC-Type: {}\r\nWARC-Target-URI: {}\r\nWARC-Date: 2022-03-15T12:00:00Z\r\nWARC-Record-ID: <urn:uuid:12345678-1234-1234-1234-123456789abc>\r\n{}Content-Length: {}\r\n\r\n",
        rec_type,
        uri,
        extra_headers,
        block.len()
    )
    .into_bytes();
    out.extend_from_slice(block);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

/// An HTTP response as stored in a WARC `response` record
pub fn http_response(status: &str, html: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
        status,
        html.len(),
        html
    )
    .into_bytes()
}

/// A gzipped request/response pair as served for one index record
pub fn warc_slice(uri: &str, html: &str) -> Vec<u8> {
    let mut data = warc_record("request", uri, "", b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
    data.extend(warc_record("response", uri, "", &http_response("200 OK", html)));
    gzip(&data)
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
