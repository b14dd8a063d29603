//! Index aggregator - entry point of the index crawl
//!
//! The aggregator owns everything iterators share:
//! - The resolved, validated list of CDX shards
//! - The HTTP session (client + throttler)
//! - The parent cancellation token of every iterator it hands out

use super::fetcher::{build_http_client, HttpSession, RetryPolicy};
use super::index::IndexQuery;
use super::scheduler::AggregatorIterator;
use super::shard::{fetch_shards, filter_shards, parse_shards, Shard};
use super::throttle::Throttler;
use crate::config::{AggregatorConfig, Config};
use crate::HarvestError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Settings shared by every iterator of one aggregator
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub query: IndexQuery,
    /// Fetcher retries for page-count probes, scheduler retries for pages
    pub retry: RetryPolicy,
    pub limit: Option<usize>,
    pub prefetch_size: usize,
}

impl AggregatorOptions {
    pub fn from_config(config: &AggregatorConfig) -> Self {
        Self {
            query: IndexQuery {
                match_type: config.match_type,
                since: config.since,
                to: config.to,
                filters: config.filters.clone(),
                page_size: config.page_size,
            },
            retry: RetryPolicy::new(
                config.max_retry,
                config.sleep_base,
                Duration::from_millis(config.sleep_unit_ms),
            ),
            limit: config.limit,
            prefetch_size: config.prefetch_size,
        }
    }
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self::from_config(&AggregatorConfig::default())
    }
}

/// Builds the session described by the configuration
pub fn build_session(config: &Config) -> Result<HttpSession, HarvestError> {
    let client = build_http_client(
        &config.user_agent,
        Duration::from_secs(config.aggregator.request_timeout_secs),
    )?;
    let throttler = Throttler::new(Duration::from_millis(
        config.aggregator.min_request_interval_ms,
    ));
    Ok(HttpSession::new(client, Arc::new(throttler)))
}

/// Aggregates one or more targets across CommonCrawl index shards
pub struct IndexAggregator {
    targets: Vec<String>,
    shards: Vec<Shard>,
    options: Arc<AggregatorOptions>,
    session: HttpSession,
    token: CancellationToken,
    span: tracing::Span,
}

impl IndexAggregator {
    /// Creates an aggregator over an explicit list of CDX servers
    ///
    /// # Returns
    ///
    /// * `Ok(IndexAggregator)` - Every server name carries `MAIN-YYYY`
    /// * `Err(HarvestError::InvalidShard)` - At least one does not
    pub fn with_shards<S: AsRef<str>>(
        targets: Vec<String>,
        shard_urls: &[S],
        options: AggregatorOptions,
        session: HttpSession,
    ) -> Result<Self, HarvestError> {
        let shards = parse_shards(shard_urls)?;
        Ok(Self::assemble(targets, shards, options, session))
    }

    /// Creates an aggregator over the shards listed by a collection index
    ///
    /// # Arguments
    ///
    /// * `targets` - URLs or domains to look up
    /// * `collinfo_url` - URL of `collinfo.json` or a compatible document
    /// * `options` - Query and iteration settings
    /// * `session` - Client and throttler used for every request
    pub async fn resolve(
        targets: Vec<String>,
        collinfo_url: &str,
        options: AggregatorOptions,
        session: HttpSession,
    ) -> Result<Self, HarvestError> {
        let shards = fetch_shards(&session, collinfo_url, &options.retry).await?;
        Ok(Self::assemble(targets, shards, options, session))
    }

    /// Builds an aggregator from configuration
    ///
    /// Uses `index-servers` when given, the collection index otherwise.
    pub async fn from_config(config: &Config) -> Result<Self, HarvestError> {
        let session = build_session(config)?;
        let options = AggregatorOptions::from_config(&config.aggregator);
        let targets = config.target_urls();

        if config.aggregator.index_servers.is_empty() {
            Self::resolve(targets, &config.aggregator.collection_index_url, options, session).await
        } else {
            Self::with_shards(targets, &config.aggregator.index_servers, options, session)
        }
    }

    fn assemble(
        targets: Vec<String>,
        shards: Vec<Shard>,
        options: AggregatorOptions,
        session: HttpSession,
    ) -> Self {
        let span = tracing::info_span!("aggregator", targets = targets.len(), shards = shards.len());
        span.in_scope(|| {
            tracing::info!(
                since = ?options.query.since,
                to = ?options.query.to,
                match_type = %options.query.match_type,
                limit = ?options.limit,
                "Index aggregator ready"
            );
        });

        Self {
            targets,
            shards,
            options: Arc::new(options),
            session,
            token: CancellationToken::new(),
            span,
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Every resolved shard, including those outside the year window
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    pub fn session(&self) -> &HttpSession {
        &self.session
    }

    /// The target x shard pairs an iterator will crawl, in order
    ///
    /// Shards whose crawl year lies outside the years of `[since, to]` are left out.
    pub fn work_plan(&self) -> Vec<(String, Shard)> {
        let shards = filter_shards(&self.shards, self.options.query.since, self.options.query.to);
        self.targets
            .iter()
            .flat_map(|target| shards.iter().map(move |shard| (target.clone(), shard.clone())))
            .collect()
    }

    /// Starts a new iteration over the whole work plan
    pub fn iter(&self) -> AggregatorIterator {
        let span = tracing::debug_span!(parent: &self.span, "iterator");
        AggregatorIterator::new(
            self.session.clone(),
            self.options.clone(),
            self.work_plan(),
            self.token.child_token(),
            span,
        )
    }

    /// Cancels every iterator created by this aggregator
    pub fn close(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!(parent: &self.span, "Closing index aggregator");
            self.token.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for IndexAggregator {
    fn drop(&mut self) {
        self.close();
    }
}
