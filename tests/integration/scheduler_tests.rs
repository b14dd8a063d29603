//! Prefetching iterator behaviour against mock CDX shards

use crate::helpers::*;
use cc_harvest::crawler::{AggregatorOptions, IndexQuery};
use cc_harvest::{IndexAggregator, SchedulerState};
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn aggregator(server: &MockServer, shards: &[&str], options: AggregatorOptions) -> IndexAggregator {
    let urls: Vec<String> = shards.iter().map(|name| shard_url(server, name)).collect();
    IndexAggregator::with_shards(vec!["example.com".to_string()], &urls, options, session()).unwrap()
}

#[tokio::test]
async fn test_three_pages_fetch_three_pages() {
    let server = MockServer::start().await;
    mount_shard(
        &server,
        "CC-MAIN-2022-05-index",
        &[page_lines(0, 2), page_lines(1, 2), page_lines(2, 2)],
    )
    .await;

    let aggregator = aggregator(&server, &["CC-MAIN-2022-05-index"], options(None));
    let mut iter = aggregator.iter();
    let mut records = Vec::new();
    while let Some(record) = iter.next().await {
        records.push(record);
    }

    assert_eq!(records.len(), 6);
    assert_eq!(count_requests(&server, "showNumPages", "true").await, 1);
    let page_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.query_pairs().any(|(k, _)| k == "page"))
        .count();
    assert_eq!(page_requests, 3);
    for page in 0..3 {
        assert_eq!(count_requests(&server, "page", &page.to_string()).await, 1);
    }
    assert_eq!(iter.state(), SchedulerState::Exhausted);
    assert_eq!(iter.stats().pages_fetched, 3);
}

#[tokio::test]
async fn test_page_retried_after_transient_failures() {
    let server = MockServer::start().await;
    let shard = "CC-MAIN-2022-05-index";
    Mock::given(method("GET"))
        .and(path(format!("/{}", shard)))
        .and(query_param("showNumPages", "true"))
        .respond_with(pages_response(1))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", shard)))
        .and(query_param("page", "0"))
        .respond_with(Sequence::new(vec![
            ResponseTemplate::new(503),
            ResponseTemplate::new(503),
            ndjson_response(&page_lines(0, 3)),
        ]))
        .mount(&server)
        .await;

    let aggregator = aggregator(&server, &[shard], options(None));
    let mut iter = aggregator.iter();
    let mut records = Vec::new();
    while let Some(record) = iter.next().await {
        records.push(record);
    }

    assert_eq!(records.len(), 3);
    assert_eq!(iter.stats().pages_retried, 2);
    assert_eq!(iter.stats().pages_dropped, 0);
    assert_eq!(count_requests(&server, "page", "0").await, 3);
}

#[tokio::test]
async fn test_page_dropped_after_max_retry() {
    let server = MockServer::start().await;
    let shard = "CC-MAIN-2022-05-index";
    Mock::given(method("GET"))
        .and(query_param("showNumPages", "true"))
        .respond_with(pages_response(2))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("page", "1"))
        .respond_with(ndjson_response(&page_lines(1, 2)))
        .mount(&server)
        .await;

    let mut opts = options(None);
    opts.retry = fast_retry(2);
    let aggregator = aggregator(&server, &[shard], opts);
    let mut iter = aggregator.iter();
    let mut records = Vec::new();
    while let Some(record) = iter.next().await {
        records.push(record);
    }

    assert_eq!(records.len(), 2);
    assert_eq!(iter.stats().pages_dropped, 1);
    assert_eq!(count_requests(&server, "page", "0").await, 3);
}

#[tokio::test]
async fn test_limit_is_exact_and_cancels() {
    let server = MockServer::start().await;
    mount_shard(
        &server,
        "CC-MAIN-2022-05-index",
        &[page_lines(0, 5), page_lines(1, 5), page_lines(2, 5)],
    )
    .await;

    let aggregator = aggregator(&server, &["CC-MAIN-2022-05-index"], options(Some(7)));
    let mut iter = aggregator.iter();
    let mut records = Vec::new();
    while let Some(record) = iter.next().await {
        records.push(record);
        if records.len() == 7 {
            assert_eq!(iter.state(), SchedulerState::Cancelled);
            assert_eq!(iter.in_flight_len(), 0);
            assert_eq!(iter.buffered_len(), 0);
        }
    }

    assert_eq!(records.len(), 7);
    assert_eq!(iter.total_emitted(), 7);
    assert!(iter.next().await.is_none());
}

#[tokio::test]
async fn test_since_and_to_respected() {
    let server = MockServer::start().await;
    let lines = vec![
        cdx_line("https://example.com/old", "20211231235959", 0),
        cdx_line("https://example.com/in-1", "20220101000000", 100),
        cdx_line("https://example.com/in-2", "20221231120000", 200),
        cdx_line("https://example.com/new", "20230101000000", 300),
    ];
    mount_shard(&server, "CC-MAIN-2022-05-index", &[lines]).await;

    let since = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2022, 12, 31, 23, 59, 59).unwrap();
    let mut opts = options(None);
    opts.query = IndexQuery {
        since: Some(since),
        to: Some(to),
        ..IndexQuery::default()
    };

    let aggregator = aggregator(&server, &["CC-MAIN-2022-05-index"], opts);
    let records: Vec<_> = aggregator.iter().into_stream().collect().await;

    assert_eq!(records.len(), 2);
    for record in &records {
        let ts = record.timestamp.unwrap();
        assert!(ts >= since && ts <= to);
    }
    assert_eq!(count_requests(&server, "from", "20220101000000").await, 2);
    assert_eq!(count_requests(&server, "to", "20221231235959").await, 2);
}

#[tokio::test]
async fn test_shard_outside_year_window_excluded() {
    let server = MockServer::start().await;
    mount_shard(&server, "CC-MAIN-2022-05-index", &[page_lines(0, 2)]).await;
    Mock::given(method("GET"))
        .and(path("/CC-MAIN-2021-09-index"))
        .respond_with(pages_response(1))
        .expect(0)
        .mount(&server)
        .await;

    let mut opts = options(None);
    opts.query.since = Some(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap());
    let aggregator = aggregator(&server, &["CC-MAIN-2021-09-index", "CC-MAIN-2022-05-index"], opts);

    let plan = aggregator.work_plan();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].1.year, 2022);

    let records: Vec<_> = aggregator.iter().into_stream().collect().await;
    assert_eq!(records.len(), 2);
    assert_eq!(count_path(&server, "/CC-MAIN-2021-09-index").await, 0);
}

#[tokio::test]
async fn test_failed_probe_skips_shard() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/CC-MAIN-2022-21-index"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_shard(&server, "CC-MAIN-2022-05-index", &[page_lines(0, 3)]).await;

    let mut opts = options(None);
    opts.retry = fast_retry(1);
    let aggregator = aggregator(&server, &["CC-MAIN-2022-21-index", "CC-MAIN-2022-05-index"], opts);
    let mut iter = aggregator.iter();
    let mut records = Vec::new();
    while let Some(record) = iter.next().await {
        records.push(record);
    }

    assert_eq!(records.len(), 3);
    assert_eq!(iter.stats().shards_skipped, 1);
    assert_eq!(count_path(&server, "/CC-MAIN-2022-21-index").await, 2);
}

#[tokio::test]
async fn test_shard_without_captures_yields_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let aggregator = aggregator(&server, &["CC-MAIN-2022-05-index"], options(None));
    let mut iter = aggregator.iter();
    assert!(iter.next().await.is_none());
    assert_eq!(iter.state(), SchedulerState::Exhausted);
    assert_eq!(iter.stats().shards_skipped, 0);
}

#[tokio::test]
async fn test_close_cancels_iterator() {
    let server = MockServer::start().await;
    mount_shard(&server, "CC-MAIN-2022-05-index", &[page_lines(0, 5), page_lines(1, 5)]).await;

    let aggregator = aggregator(&server, &["CC-MAIN-2022-05-index"], options(None));
    let mut iter = aggregator.iter();
    assert!(iter.next().await.is_some());

    aggregator.close();
    assert!(aggregator.is_closed());
    assert!(iter.next().await.is_none());
    assert_eq!(iter.state(), SchedulerState::Cancelled);
}

/// Page 0 answers at once, the remaining pages hang
async fn mount_slow_shard(server: &MockServer, name: &str, pages: u32) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", name)))
        .and(query_param("showNumPages", "true"))
        .respond_with(pages_response(pages))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", name)))
        .and(query_param("page", "0"))
        .respond_with(ndjson_response(&page_lines(0, 2)))
        .mount(server)
        .await;
    for page in 1..pages {
        Mock::given(method("GET"))
            .and(path(format!("/{}", name)))
            .and(query_param("page", page.to_string()))
            .respond_with(ndjson_response(&page_lines(page, 2)).set_delay(Duration::from_secs(10)))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_close_cancels_every_iterator() {
    let server = MockServer::start().await;
    mount_slow_shard(&server, "CC-MAIN-2022-05-index", 3).await;

    let aggregator = aggregator(&server, &["CC-MAIN-2022-05-index"], options(None));
    let mut first = aggregator.iter();
    let mut second = aggregator.iter();

    assert!(first.next().await.is_some());
    assert!(second.next().await.is_some());
    assert_eq!(first.in_flight_len(), 2);
    assert_eq!(second.in_flight_len(), 2);

    aggregator.close();

    for iter in [&mut first, &mut second] {
        assert!(iter.next().await.is_none());
        assert_eq!(iter.state(), SchedulerState::Cancelled);
        assert_eq!(iter.in_flight_len(), 0);
    }
}
