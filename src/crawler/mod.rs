//! Crawler module for CommonCrawl index aggregation
//!
//! This module contains the index crawling logic, including:
//! - Request spacing through a shared throttler
//! - HTTP fetching with retry logic and failure classification
//! - Shard resolution from the collection index
//! - CDX page-count probes and page fetches
//! - The prefetching, cancellable record iterator

mod coordinator;
mod fetcher;
mod index;
mod scheduler;
mod shard;
mod throttle;

pub use coordinator::{build_session, AggregatorOptions, IndexAggregator};
pub use fetcher::{
    build_http_client, decode_ndjson, fetch_with_retry, retrieve, retrieve_bytes, HttpSession,
    RequestContext, RetrieveResponse, RetryPolicy, NDJSON_CONTENT_TYPE,
};
pub use index::{
    fetch_page, get_captured_responses, get_number_of_pages, record_from_value, IndexQuery,
};
pub use scheduler::{AggregatorIterator, IteratorStats};
pub use shard::{fetch_shards, filter_shards, parse_shards, Shard};
pub use throttle::Throttler;
