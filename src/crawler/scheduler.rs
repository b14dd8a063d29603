//! Prefetching iterator over a CDX index aggregation
//!
//! The iterator walks a FIFO of target x shard pairs. Each pair is first probed
//! for its page count, then one task per page is spawned into a `JoinSet`. While
//! the consumer drains the buffer of ready records, further pages are already
//! being fetched.
//!
//! - Without a limit, up to `prefetch_size + 1` pairs' pages may be in flight
//! - With a limit, pairs are advanced one at a time so no work is wasted
//! - Failed pages are re-spawned with a backoff while their retry budget lasts
//! - Reaching the limit, dropping the iterator or closing the aggregator cancels
//!   every outstanding task exactly once

use super::coordinator::AggregatorOptions;
use super::fetcher::{HttpSession, RetryPolicy};
use super::index::{fetch_page, get_number_of_pages};
use super::shard::Shard;
use crate::record::{DomainCrawl, DomainRecord};
use crate::state::SchedulerState;
use crate::DownloadError;
use futures::Stream;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What a page task hands back to the iterator
#[derive(Debug)]
enum PageOutcome {
    Fetched {
        crawl: DomainCrawl,
        records: Vec<DomainRecord>,
    },
    Failed {
        crawl: DomainCrawl,
        error: DownloadError,
    },
}

/// Counters describing one iterator's progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IteratorStats {
    pub pages_fetched: u64,
    pub pages_retried: u64,
    pub pages_dropped: u64,
    pub shards_skipped: u64,
    pub records_emitted: u64,
}

/// Cancellable, prefetching stream of index records
pub struct AggregatorIterator {
    session: HttpSession,
    options: Arc<AggregatorOptions>,

    /// Target x shard pairs not yet probed
    work_queue: VecDeque<DomainCrawl>,

    /// Page fetches currently running; `None` results come from cancelled tasks
    in_flight: JoinSet<Option<PageOutcome>>,

    /// Records fetched but not yet handed out, in server order per page
    buffer: VecDeque<DomainRecord>,

    total_emitted: usize,
    state: SchedulerState,
    stats: IteratorStats,
    token: CancellationToken,
    closed: bool,
    span: tracing::Span,
}

impl AggregatorIterator {
    /// Creates an iterator over `plan`, which lists target x shard pairs in crawl order
    ///
    /// # Arguments
    ///
    /// * `session` - Client and throttler shared with the aggregator
    /// * `options` - Query, retry policy, limit and prefetch settings
    /// * `plan` - Pairs to crawl, already filtered to the year window
    /// * `token` - Cancelling it stops every task this iterator spawned
    /// * `span` - Parent span for iterator and page-task logs
    pub fn new(
        session: HttpSession,
        options: Arc<AggregatorOptions>,
        plan: Vec<(String, Shard)>,
        token: CancellationToken,
        span: tracing::Span,
    ) -> Self {
        let work_queue: VecDeque<DomainCrawl> = plan
            .into_iter()
            .map(|(target, shard)| DomainCrawl::new(target, shard, 0))
            .collect();

        let state = if work_queue.is_empty() {
            SchedulerState::Exhausted
        } else {
            SchedulerState::Seeding
        };

        Self {
            session,
            options,
            work_queue,
            in_flight: JoinSet::new(),
            buffer: VecDeque::new(),
            total_emitted: 0,
            state,
            stats: IteratorStats::default(),
            token,
            closed: false,
            span,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> &IteratorStats {
        &self.stats
    }

    pub fn total_emitted(&self) -> usize {
        self.total_emitted
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queued_len(&self) -> usize {
        self.work_queue.len()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn limit_reached(&self) -> bool {
        self.options
            .limit
            .map_or(false, |limit| self.total_emitted >= limit)
    }

    /// Moves to the state implied by the queues, unless already terminal
    fn observe(&mut self) {
        let next = SchedulerState::derive(
            self.work_queue.len(),
            self.in_flight.len(),
            self.buffer.len(),
        );
        if self.state.can_transition_to(next) {
            self.state = next;
        }
    }

    /// Spawns the fetch of one page
    ///
    /// A page on its n-th retry first sleeps the backoff for attempt n-1.
    fn spawn_page(&mut self, crawl: DomainCrawl) {
        let session = self.session.clone();
        let options = self.options.clone();
        let token = self.token.clone();
        let span = tracing::debug_span!(
            parent: &self.span,
            "page",
            shard = %crawl.shard,
            site = %crawl.target,
            page = crawl.page,
            retry = crawl.retry
        );

        let work = async move {
            if crawl.retry > 0 {
                tokio::time::sleep(options.retry.backoff(crawl.retry - 1)).await;
            }
            match fetch_page(&session, &crawl, &options.query, &RetryPolicy::single()).await {
                Ok(records) => PageOutcome::Fetched { crawl, records },
                Err(error) => PageOutcome::Failed { crawl, error },
            }
        };

        self.in_flight.spawn(
            async move {
                tokio::select! {
                    _ = token.cancelled() => None,
                    outcome = work => Some(outcome),
                }
            }
            .instrument(span),
        );
    }

    /// Pops pairs until one is probed successfully, then spawns its pages
    ///
    /// Failed probes are logged and skipped within the same call.
    async fn advance(&mut self) {
        while let Some(crawl) = self.work_queue.pop_front() {
            let probe = tokio::select! {
                _ = self.token.cancelled() => return,
                probe = get_number_of_pages(
                    &self.session,
                    &crawl.shard,
                    &crawl.target,
                    &self.options.query,
                    &self.options.retry,
                ) => probe,
            };

            match probe {
                Ok(pages) => {
                    tracing::debug!(
                        shard = %crawl.shard,
                        site = %crawl.target,
                        pages,
                        "Scheduling index pages"
                    );
                    for page in 0..pages {
                        self.spawn_page(DomainCrawl::new(crawl.target.clone(), crawl.shard.clone(), page));
                    }
                    return;
                }
                Err(err) => {
                    self.stats.shards_skipped += 1;
                    tracing::warn!(
                        shard = %crawl.shard,
                        site = %crawl.target,
                        status = err.status,
                        "Skipping shard, page count unavailable: {}",
                        err.reason
                    );
                }
            }
        }
    }

    /// Tops up the in-flight set from the work queue
    async fn refill(&mut self) {
        while !self.work_queue.is_empty()
            && (self.in_flight.is_empty()
                || (self.options.limit.is_none()
                    && self.in_flight.len() <= self.options.prefetch_size))
        {
            if self.token.is_cancelled() {
                return;
            }
            self.advance().await;
        }
    }

    /// Awaits finished pages until records are buffered or nothing is in flight
    async fn wait_for_completion(&mut self) {
        while !self.in_flight.is_empty() && self.buffer.is_empty() {
            let joined = tokio::select! {
                _ = self.token.cancelled() => return,
                joined = self.in_flight.join_next() => joined,
            };

            match joined {
                None => break,
                Some(Err(join_err)) => {
                    if !join_err.is_cancelled() {
                        self.stats.pages_dropped += 1;
                        tracing::error!("Page task failed: {}", join_err);
                    }
                }
                Some(Ok(None)) => {}
                Some(Ok(Some(PageOutcome::Fetched { records, .. }))) => {
                    self.stats.pages_fetched += 1;
                    self.buffer.extend(records);
                }
                Some(Ok(Some(PageOutcome::Failed { crawl, error }))) => {
                    if error.is_retryable() && crawl.retry < self.options.retry.max_retry {
                        self.stats.pages_retried += 1;
                        tracing::debug!(
                            shard = %crawl.shard,
                            site = %crawl.target,
                            page = crawl.page,
                            retry = crawl.retry + 1,
                            "Re-scheduling index page"
                        );
                        self.spawn_page(crawl.next_retry());
                    } else {
                        self.stats.pages_dropped += 1;
                        tracing::warn!(
                            shard = %crawl.shard,
                            site = %crawl.target,
                            page = crawl.page,
                            retry = crawl.retry,
                            status = error.status,
                            "Dropping index page: {}",
                            error.reason
                        );
                    }
                }
            }
        }
    }

    /// Returns the next record, or None once the aggregation is done
    ///
    /// # Returns
    ///
    /// * `Some(DomainRecord)` - The next record in page order
    /// * `None` - Limit reached, all work exhausted, or the iterator was cancelled
    pub async fn next(&mut self) -> Option<DomainRecord> {
        let span = self.span.clone();
        self.next_record().instrument(span).await
    }

    async fn next_record(&mut self) -> Option<DomainRecord> {
        if self.state.is_terminal() {
            return None;
        }
        if self.token.is_cancelled() || self.limit_reached() {
            self.cancel();
            return None;
        }

        while self.buffer.is_empty() {
            if self.work_queue.is_empty() && self.in_flight.is_empty() {
                self.state = SchedulerState::Exhausted;
                tracing::debug!(emitted = self.total_emitted, "Index aggregation exhausted");
                return None;
            }
            self.refill().await;
            self.observe();
            self.wait_for_completion().await;

            if self.token.is_cancelled() {
                self.cancel();
                return None;
            }
        }

        let record = self.buffer.pop_front()?;
        self.total_emitted += 1;
        self.stats.records_emitted += 1;

        if self.limit_reached() {
            tracing::debug!(emitted = self.total_emitted, "Record limit reached");
            self.cancel();
        } else {
            self.observe();
        }
        Some(record)
    }

    /// Stops all outstanding work
    ///
    /// Aborts and detaches every in-flight task without awaiting it. Calling this
    /// more than once has no further effect.
    pub fn cancel(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.token.cancel();
        let aborted = self.in_flight.len();
        self.in_flight.abort_all();
        self.in_flight.detach_all();
        self.work_queue.clear();
        self.buffer.clear();

        if self.state.can_transition_to(SchedulerState::Cancelled) {
            self.state = SchedulerState::Cancelled;
        }
        tracing::debug!(parent: &self.span, aborted, "Iterator cancelled");
    }

    /// Adapts the iterator into a `Stream` of records
    pub fn into_stream(self) -> impl Stream<Item = DomainRecord> {
        futures::stream::unfold(self, |mut iter| async move {
            let record = iter.next().await?;
            Some((record, iter))
        })
    }
}

impl Drop for AggregatorIterator {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for AggregatorIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorIterator")
            .field("state", &self.state)
            .field("queued", &self.work_queue.len())
            .field("in_flight", &self.in_flight.len())
            .field("buffered", &self.buffer.len())
            .field("total_emitted", &self.total_emitted)
            .finish()
    }
}
