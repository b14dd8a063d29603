//! Integration tests for cc-harvest
//!
//! These tests use wiremock to stand in for CDX index servers and the WARC
//! archive, and exercise the aggregator, downloader and pipeline end-to-end.

mod download_tests;
mod helpers;
mod index_tests;
mod pipeline_tests;
mod scheduler_tests;
