//! Ranged WARC downloads against a mock archive

use crate::helpers::*;
use cc_harvest::crawler::RetryPolicy;
use cc_harvest::download::{payload_digest, Downloader};
use cc_harvest::record::parse_cdx_timestamp;
use cc_harvest::{DomainRecord, FailureKind};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(offset: u64, length: u64) -> DomainRecord {
    DomainRecord {
        filename: WARC_FILE.to_string(),
        url: Some("https://example.com/article".to_string()),
        offset,
        length,
        digest: None,
        encoding: None,
        timestamp: parse_cdx_timestamp("20220315120000"),
    }
}

fn downloader(server: &MockServer) -> Downloader {
    Downloader::new(session(), server.uri(), fast_retry(2))
}

#[tokio::test]
async fn test_requests_exact_byte_range() {
    let server = MockServer::start().await;
    let slice = warc_slice("https://example.com/article", "<html><body>Hello</body></html>");
    Mock::given(method("GET"))
        .and(path(format!("/{}", WARC_FILE)))
        .and(header("Range", "bytes=100-149"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(slice))
        .expect(1)
        .mount(&server)
        .await;

    let results = downloader(&server).download(&record(100, 50)).await.unwrap();

    assert_eq!(results.len(), 2);
    let (text, metadata) = &results[1];
    assert!(metadata.is_response());
    assert_eq!(metadata.http_status, Some(200));
    assert_eq!(metadata.url(), Some("https://example.com/article"));
    assert_eq!(metadata.encoding, "UTF-8");
    assert!(text.contains("Hello"));
    assert_eq!(results[0].1.rec_type.as_deref(), Some("request"));
}

#[tokio::test]
async fn test_zero_length_record_is_not_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206))
        .expect(0)
        .mount(&server)
        .await;

    let err = downloader(&server).download(&record(100, 0)).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Fatal);
}

#[tokio::test]
async fn test_transient_archive_errors_are_retried() {
    let server = MockServer::start().await;
    let slice = warc_slice("https://example.com/article", "<p>ok</p>");
    Mock::given(method("GET"))
        .respond_with(Sequence::new(vec![
            ResponseTemplate::new(503),
            ResponseTemplate::new(206).set_body_bytes(slice),
        ]))
        .mount(&server)
        .await;

    let results = downloader(&server).download(&record(0, 10)).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(count_path(&server, &format!("/{}", WARC_FILE)).await, 2);
}

#[tokio::test]
async fn test_missing_archive_fails_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = downloader(&server).download(&record(0, 10)).await.unwrap_err();
    assert_eq!(err.status, 404);
    assert_eq!(count_path(&server, &format!("/{}", WARC_FILE)).await, 1);
}

fn slice_with_digest(html: &str, digest: &str) -> Vec<u8> {
    let http = http_response("200 OK", html);
    let headers = format!("WARC-Payload-Digest: {}\r\n", digest);
    gzip(&warc_record("response", "https://example.com/article", &headers, &http))
}

#[tokio::test]
async fn test_digest_verification() {
    let html = "<html><body>verified</body></html>";
    let good = payload_digest(html.as_bytes());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Range", "bytes=0-9"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(slice_with_digest(html, &good)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("Range", "bytes=10-19"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(slice_with_digest(html, "sha1:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")),
        )
        .mount(&server)
        .await;

    let checked = Downloader::new(session(), server.uri(), RetryPolicy::single())
        .with_digest_verification(true);

    let results = checked.download(&record(0, 10)).await.unwrap();
    assert!(results[0].0.contains("verified"));

    let err = checked.download(&record(10, 10)).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Integrity);
    assert!(!err.is_retryable());

    let unchecked = Downloader::new(session(), server.uri(), RetryPolicy::single());
    assert!(unchecked.download(&record(10, 10)).await.is_ok());
}

#[tokio::test]
async fn test_configured_encoding_overrides_detection() {
    let server = MockServer::start().await;
    // "café" in windows-1252
    let mut http = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<p>caf".to_vec();
    http.push(0xE9);
    http.extend_from_slice(b"</p>");
    let slice = gzip(&warc_record("response", "https://example.com/article", "", &http));
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(slice))
        .mount(&server)
        .await;

    let downloader = Downloader::new(session(), server.uri(), RetryPolicy::single())
        .with_encoding(Some("windows-1252"))
        .unwrap();
    let results = downloader.download(&record(0, 10)).await.unwrap();

    assert_eq!(results[0].0, "<p>café</p>");
    assert_eq!(results[0].1.encoding, "windows-1252");
}
