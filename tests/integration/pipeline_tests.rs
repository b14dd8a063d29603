//! End-to-end harvest runs: index -> download -> route -> extract -> stream

use crate::helpers::*;
use cc_harvest::config::parse_config;
use cc_harvest::pipeline::{harvest, HarvestOptions};
use cc_harvest::storage::{open_storage, RunStatus, Storage};
use cc_harvest::Config;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHARD: &str = "CC-MAIN-2022-05-index";

const ARTICLE: &str = r#"<html><head><title>Budget vote | Example News</title></head>
<body><h1> Budget   vote delayed </h1><span class="author">By Jane Doe</span></body></html>"#;

const ABOUT: &str = "<html><head><title>About</title></head><body><p>About us</p></body></html>";

fn config(server: &MockServer, dir: &TempDir, extra: &str) -> Config {
    let toml = format!(
        r#"
[aggregator]
index-servers = ["{shard}"]
sleep-unit-ms = 1
min-request-interval-ms = 0

[downloader]
base-url = "{base}/"
max-concurrent-downloads = 2
sleep-unit-ms = 1

[user-agent]
crawler-name = "TestHarvester"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[output]
directory = "{out}"
ledger-path = "{ledger}"

[[target]]
url = "example.com"
{extra}
"#,
        shard = shard_url(server, SHARD),
        base = server.uri(),
        out = dir.path().join("out").display(),
        ledger = dir.path().join("ledger.db").display(),
        extra = extra,
    );
    parse_config(&toml).unwrap()
}

/// Index with two captures and the archive slices behind them
async fn mount_site(server: &MockServer) {
    let lines = vec![
        cdx_line("https://example.com/news/budget.html", "20220315120000", 0),
        cdx_line("https://www.example.com/about", "20220316120000", 100),
    ];
    mount_shard(server, SHARD, &[lines]).await;

    Mock::given(method("GET"))
        .and(path(format!("/{}", WARC_FILE)))
        .and(header("Range", "bytes=0-99"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(warc_slice("https://example.com/news/budget.html", ARTICLE)),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", WARC_FILE)))
        .and(header("Range", "bytes=100-199"))
        .respond_with(
            ResponseTemplate::new(206).set_body_bytes(warc_slice("https://www.example.com/about", ABOUT)),
        )
        .mount(server)
        .await;
}

fn read_documents(root: &Path) -> Vec<Value> {
    let mut documents = Vec::new();
    let mut files: Vec<_> = walk(root);
    files.sort();
    for file in files {
        let content = std::fs::read_to_string(&file).unwrap();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            documents.push(serde_json::from_str(line).unwrap());
        }
    }
    documents
}

fn walk(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}

#[tokio::test]
async fn test_harvest_streams_html_documents() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = TempDir::new().unwrap();
    let config = config(&server, &dir, "");

    let summary = harvest(&config, &HarvestOptions::default()).await.unwrap();

    assert_eq!(summary.records_found, 2);
    assert_eq!(summary.streamed, 2);
    assert_eq!(summary.downloads_failed, 0);
    assert_eq!(summary.warc_records, 4);

    let documents = read_documents(&dir.path().join("out"));
    assert_eq!(documents.len(), 2);
    let mut urls: Vec<&str> = documents.iter().map(|d| d["url"].as_str().unwrap()).collect();
    urls.sort_unstable();
    assert_eq!(
        urls,
        vec!["https://example.com/news/budget.html", "https://www.example.com/about"]
    );
    assert!(documents.iter().all(|d| d["html"].is_string() && d["timestamp"].is_string()));
}

#[tokio::test]
async fn test_harvest_routes_to_rule_extractor() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = TempDir::new().unwrap();
    let routes = r#"
[[extractor]]
name = "article"

[[extractor.field]]
name = "headline"
selector = "h1"
required = true
transforms = [{ op = "collapse-whitespace" }]

[[extractor.field]]
name = "author"
selector = ".author"
transforms = [{ op = "strip-prefix", value = "By " }]

[[route]]
pattern = "example\\.com/news/"
extractor = "article"
"#;
    let config = config(&server, &dir, routes);

    let summary = harvest(&config, &HarvestOptions::default()).await.unwrap();

    assert_eq!(summary.streamed, 1);
    assert_eq!(summary.unrouted, 1);

    let documents = read_documents(&dir.path().join("out"));
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["headline"], "Budget vote delayed");
    assert_eq!(documents[0]["author"], "Jane Doe");
    assert_eq!(documents[0]["url"], "https://example.com/news/budget.html");
}

#[tokio::test]
async fn test_second_run_skips_ledgered_captures() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = TempDir::new().unwrap();
    let config = config(&server, &dir, "");
    let options = HarvestOptions {
        config_hash: "abc123".to_string(),
        ..HarvestOptions::default()
    };

    let first = harvest(&config, &options).await.unwrap();
    assert_eq!(first.streamed, 2);

    let second = harvest(&config, &options).await.unwrap();
    assert_eq!(second.records_found, 2);
    assert_eq!(second.records_skipped, 2);
    assert_eq!(second.streamed, 0);

    let storage = open_storage(&dir.path().join("ledger.db")).unwrap();
    assert_eq!(storage.count_runs().unwrap(), 2);
    assert_eq!(storage.count_processed().unwrap(), 2);
    let latest = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(latest.status, RunStatus::Completed);
    assert_eq!(latest.config_hash, "abc123");
    assert_eq!(read_documents(&dir.path().join("out")).len(), 2);
}

#[tokio::test]
async fn test_query_distinct_captures_are_all_streamed() {
    let server = MockServer::start().await;
    let urls = [
        "https://example.com/article.php?id=1",
        "https://example.com/article.php?id=2",
    ];
    let lines: Vec<_> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| cdx_line(url, "20220315120000", i as u64 * 100))
        .collect();
    mount_shard(&server, SHARD, &[lines]).await;
    for (i, url) in urls.iter().enumerate() {
        let start = i * 100;
        Mock::given(method("GET"))
            .and(path(format!("/{}", WARC_FILE)))
            .and(header("Range", format!("bytes={}-{}", start, start + 99).as_str()))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(warc_slice(url, ARTICLE)))
            .mount(&server)
            .await;
    }
    let dir = TempDir::new().unwrap();
    let config = config(&server, &dir, "");

    let summary = harvest(&config, &HarvestOptions::default()).await.unwrap();

    assert_eq!(summary.records_found, 2);
    assert_eq!(summary.records_skipped, 0);
    assert_eq!(summary.streamed, 2);
    let storage = open_storage(&dir.path().join("ledger.db")).unwrap();
    assert_eq!(storage.count_processed().unwrap(), 2);
}

#[tokio::test]
async fn test_records_only_mode() {
    let server = MockServer::start().await;
    mount_shard(&server, SHARD, &[page_lines(0, 3), page_lines(1, 2)]).await;
    let dir = TempDir::new().unwrap();
    let config = config(&server, &dir, "");
    let options = HarvestOptions {
        records_only: true,
        limit: Some(4),
        ..HarvestOptions::default()
    };

    let summary = harvest(&config, &options).await.unwrap();

    assert_eq!(summary.records_found, 4);
    assert_eq!(summary.streamed, 4);
    let documents = read_documents(&dir.path().join("out"));
    assert_eq!(documents.len(), 4);
    assert!(documents.iter().all(|d| d["filename"] == WARC_FILE));
    assert_eq!(count_path(&server, &format!("/{}", WARC_FILE)).await, 0);
}

#[tokio::test]
async fn test_failed_downloads_do_not_abort_run() {
    let server = MockServer::start().await;
    mount_shard(
        &server,
        SHARD,
        &[vec![cdx_line("https://example.com/missing", "20220315120000", 500)]],
    )
    .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", WARC_FILE)))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let config = config(&server, &dir, "");

    let summary = harvest(&config, &HarvestOptions::default()).await.unwrap();

    assert_eq!(summary.records_found, 1);
    assert_eq!(summary.downloads_failed, 1);
    assert_eq!(summary.streamed, 0);
}

#[tokio::test]
async fn test_unresolvable_shards_fail_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let mut config = config(&server, &dir, "");
    config.aggregator.index_servers.clear();
    config.aggregator.collection_index_url = format!("{}/collinfo.json", server.uri());
    config.aggregator.max_retry = 1;

    let result = harvest(&config, &HarvestOptions::default()).await;
    assert!(result.is_err());
}
