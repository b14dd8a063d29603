//! Retrying fetcher, shard resolution and CDX page source against a mock index

use crate::helpers::*;
use cc_harvest::crawler::{
    fetch_page, fetch_shards, fetch_with_retry, get_captured_responses, get_number_of_pages,
    retrieve, IndexQuery, RequestContext, RetryPolicy, Shard, NDJSON_CONTENT_TYPE,
};
use cc_harvest::record::DomainCrawl;
use cc_harvest::{FailureKind, HarvestError, IndexAggregator};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHARD: &str = "CC-MAIN-2022-05-index";

fn ctx() -> RequestContext {
    RequestContext::new("example.com", SHARD)
}

#[test]
fn test_invalid_shard_rejected() {
    let result = IndexAggregator::with_shards(
        vec!["example.com".to_string()],
        &["https://index.commoncrawl.org/CC-MAIN-2022-05-index", "https://index.commoncrawl.org/foo"],
        options(None),
        session(),
    );
    assert!(matches!(result, Err(HarvestError::InvalidShard { shard }) if shard.ends_with("/foo")));
}

#[tokio::test]
async fn test_retryable_status_retried_max_retry_times() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = shard_url(&server, SHARD);
    let err = fetch_with_retry(&session(), &url, &[], &[], &fast_retry(3), &ctx())
        .await
        .unwrap_err();

    assert_eq!(err.status, 503);
    assert!(err.is_retryable());
    assert_eq!(count_path(&server, &format!("/{}", SHARD)).await, 4);
}

#[tokio::test]
async fn test_other_status_fails_after_one_request() {
    for status in [400u16, 403, 404, 429] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let url = shard_url(&server, SHARD);
        let err = fetch_with_retry(&session(), &url, &[], &[], &fast_retry(5), &ctx())
            .await
            .unwrap_err();

        assert_eq!(err.status, status);
        assert_eq!(err.kind, FailureKind::Fatal);
        assert_eq!(count_path(&server, &format!("/{}", SHARD)).await, 1);
    }
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(Sequence::new(vec![
            ResponseTemplate::new(502),
            ResponseTemplate::new(500),
            ndjson_response(&[json!({"a": 1}), json!({"a": 2})]),
        ]))
        .mount(&server)
        .await;

    let url = shard_url(&server, SHARD);
    let values = retrieve(&session(), &url, &[], Some(NDJSON_CONTENT_TYPE), &fast_retry(5), &ctx())
        .await
        .unwrap();

    assert_eq!(values.len(), 2);
    assert_eq!(values[1]["a"], 2);
    assert_eq!(count_path(&server, &format!("/{}", SHARD)).await, 3);
}

#[tokio::test]
async fn test_content_type_mismatch_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
        .mount(&server)
        .await;

    let url = shard_url(&server, SHARD);
    let err = retrieve(&session(), &url, &[], Some(NDJSON_CONTENT_TYPE), &fast_retry(5), &ctx())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Fatal);
    assert_eq!(count_path(&server, &format!("/{}", SHARD)).await, 1);
}

#[tokio::test]
async fn test_malformed_ndjson_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{\"a\": 1}\n{oops", NDJSON_CONTENT_TYPE))
        .mount(&server)
        .await;

    let url = shard_url(&server, SHARD);
    let err = retrieve(&session(), &url, &[], Some(NDJSON_CONTENT_TYPE), &fast_retry(5), &ctx())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Fatal);
    assert_eq!(count_path(&server, &format!("/{}", SHARD)).await, 1);
}

#[tokio::test]
async fn test_page_count_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", SHARD)))
        .and(query_param("showNumPages", "true"))
        .and(query_param("url", "example.com"))
        .and(query_param("matchType", "domain"))
        .and(query_param("output", "json"))
        .respond_with(pages_response(3))
        .mount(&server)
        .await;

    let shard = Shard::parse(&shard_url(&server, SHARD)).unwrap();
    let pages = get_number_of_pages(&session(), &shard, "example.com", &IndexQuery::default(), &fast_retry(2))
        .await
        .unwrap();
    assert_eq!(pages, 3);
}

#[tokio::test]
async fn test_page_count_is_repeatable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", SHARD)))
        .and(query_param("showNumPages", "true"))
        .respond_with(pages_response(4))
        .mount(&server)
        .await;

    let shard = Shard::parse(&shard_url(&server, SHARD)).unwrap();
    let query = IndexQuery::default();
    let first = get_number_of_pages(&session(), &shard, "example.com", &query, &fast_retry(2))
        .await
        .unwrap();
    let second = get_number_of_pages(&session(), &shard, "example.com", &query, &fast_retry(2))
        .await
        .unwrap();

    assert_eq!(first, 4);
    assert_eq!(first, second);
    assert_eq!(count_requests(&server, "showNumPages", "true").await, 2);
}

#[tokio::test]
async fn test_page_count_without_captures_is_zero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("No Captures found for: example.com"))
        .mount(&server)
        .await;

    let shard = Shard::parse(&shard_url(&server, SHARD)).unwrap();
    let pages = get_number_of_pages(&session(), &shard, "example.com", &IndexQuery::default(), &fast_retry(2))
        .await
        .unwrap();
    assert_eq!(pages, 0);
}

#[tokio::test]
async fn test_fetch_page_parses_records() {
    let server = MockServer::start().await;
    let mut lines = page_lines(1, 2);
    lines.push(json!({"url": "https://example.com/no-file"}));
    Mock::given(method("GET"))
        .and(query_param("page", "1"))
        .respond_with(ndjson_response(&lines))
        .mount(&server)
        .await;

    let shard = Shard::parse(&shard_url(&server, SHARD)).unwrap();
    let crawl = DomainCrawl::new("example.com", shard, 1);
    let records = fetch_page(&session(), &crawl, &IndexQuery::default(), &RetryPolicy::single())
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].offset, 1000);
    assert_eq!(records[0].length, 100);
    assert_eq!(records[1].url.as_deref(), Some("https://example.com/p1/1"));
    assert_eq!(records[0].filename, WARC_FILE);
    assert!(records[0].timestamp.is_some());
}

#[tokio::test]
async fn test_captured_responses_empty_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let shard = Shard::parse(&shard_url(&server, SHARD)).unwrap();
    let crawl = DomainCrawl::new("example.com", shard, 0);
    let records = get_captured_responses(&session(), &crawl, &IndexQuery::default(), &fast_retry(1)).await;

    assert!(records.is_empty());
    assert_eq!(count_path(&server, &format!("/{}", SHARD)).await, 2);
}

#[tokio::test]
async fn test_fetch_shards_from_collection_index() {
    let server = MockServer::start().await;
    let listing = json!([
        {"id": "CC-MAIN-2022-05", "name": "January 2022 Index", "cdx-api": shard_url(&server, "CC-MAIN-2022-05-index")},
        {"id": "CC-MAIN-2021-49", "name": "November 2021 Index", "cdx-api": shard_url(&server, "CC-MAIN-2021-49-index")},
    ]);
    Mock::given(method("GET"))
        .and(path("/collinfo.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing))
        .mount(&server)
        .await;

    let shards = fetch_shards(&session(), &format!("{}/collinfo.json", server.uri()), &fast_retry(1))
        .await
        .unwrap();

    assert_eq!(shards.len(), 2);
    assert_eq!(shards[0].year, 2022);
    assert_eq!(shards[1].year, 2021);
}

#[tokio::test]
async fn test_fetch_shards_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = fetch_shards(&session(), &format!("{}/collinfo.json", server.uri()), &fast_retry(1)).await;
    assert!(matches!(result, Err(HarvestError::ShardResolution(_))));
}
