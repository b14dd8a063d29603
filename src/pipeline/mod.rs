//! Processing pipeline from index records to streamed documents
//!
//! This module handles:
//! - Compiling extraction rules and transforms from configuration
//! - Routing captures to extractors by URL and capture time
//! - Downloading, extracting and streaming captures
//! - Driving a whole harvest run, including the processed-record ledger

pub mod extractor;
pub mod processor;
pub mod router;
pub mod transform;

pub use extractor::{Extractor, ExtractorRegistry, HtmlExtractor, RuleExtractor};
pub use processor::{Ledger, ProcessorPipeline};
pub use router::{Route, Router};
pub use transform::Transform;

use crate::config::Config;
use crate::crawler::{AggregatorIterator, IndexAggregator, IteratorStats};
use crate::download::{Downloader, PipeMetadata};
use crate::output::{build_streamer, JsonLinesStreamer, OutputError, RunSummary, Streamer};
use crate::record::DomainRecord;
use crate::storage::{open_storage, RunStatus};
use crate::{DownloadError, HarvestError};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Name of the built-in pass-through extractor
pub const HTML_EXTRACTOR: &str = "html";

/// Errors raised while routing a capture
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("No route matches '{url}'")]
    NoMatch { url: String },

    #[error("Route refers to unregistered extractor '{name}'")]
    UnknownExtractor { name: String },
}

/// Per-run switches that are not part of the configuration file
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Hash of the configuration, stored with the run in the ledger
    pub config_hash: String,

    /// Overrides `[aggregator] limit`
    pub limit: Option<usize>,

    /// Stream the index records themselves instead of downloading captures
    pub records_only: bool,

    /// Fields merged into every extracted document
    pub additional_info: Map<String, Value>,

    /// Cancelled to stop the run early; in-flight downloads are still processed
    pub shutdown: CancellationToken,
}

type Download = (DomainRecord, Result<Vec<(String, PipeMetadata)>, DownloadError>);

/// Runs one harvest described by `config`
///
/// # Arguments
///
/// * `config` - Validated configuration
/// * `options` - Run switches
///
/// # Returns
///
/// * `Ok(RunSummary)` - Counters of the finished (or interrupted) run
/// * `Err(HarvestError)` - Shard resolution, construction, output or ledger failure
pub async fn harvest(config: &Config, options: &HarvestOptions) -> Result<RunSummary, HarvestError> {
    let mut config = config.clone();
    if options.limit.is_some() {
        config.aggregator.limit = options.limit;
    }

    let aggregator = IndexAggregator::from_config(&config).await?;
    let ledger = match config.output.ledger_path.as_deref() {
        Some(path) => Some(Ledger::start(open_storage(Path::new(path))?, &options.config_hash)?),
        None => None,
    };

    let result = if options.records_only {
        harvest_records(&aggregator, &config, ledger, options).await
    } else {
        harvest_captures(&aggregator, &config, ledger, options).await
    };
    aggregator.close();

    let summary = result?;
    summary.log();
    Ok(summary)
}

fn run_status(succeeded: bool, shutdown: &CancellationToken) -> RunStatus {
    match (succeeded, shutdown.is_cancelled()) {
        (false, _) => RunStatus::Failed,
        (true, true) => RunStatus::Interrupted,
        (true, false) => RunStatus::Completed,
    }
}

fn add_index_stats(summary: &mut RunSummary, stats: &IteratorStats) {
    summary.records_found = stats.records_emitted;
    summary.pages_fetched = stats.pages_fetched;
    summary.pages_retried = stats.pages_retried;
    summary.pages_dropped = stats.pages_dropped;
    summary.shards_skipped = stats.shards_skipped;
}

/// Next record, or None once the index is exhausted or a shutdown was requested
async fn next_record(
    iter: &mut AggregatorIterator,
    shutdown: &CancellationToken,
) -> Option<DomainRecord> {
    tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested, finishing in-flight work");
            None
        }
        record = iter.next() => record,
    }
}

async fn harvest_captures(
    aggregator: &IndexAggregator,
    config: &Config,
    ledger: Option<Ledger>,
    options: &HarvestOptions,
) -> Result<RunSummary, HarvestError> {
    let downloader = Downloader::from_config(aggregator.session().clone(), &config.downloader)?;
    let router = Router::from_config(config)?;
    let mut pipeline = ProcessorPipeline::new(downloader, router, build_streamer(&config.output));
    if let Some(ledger) = ledger {
        pipeline = pipeline.with_ledger(ledger);
    }

    let mut iter = aggregator.iter();
    let driven = drive_downloads(
        &mut pipeline,
        &mut iter,
        config.downloader.max_concurrent_downloads.max(1),
        options,
    )
    .await;
    let flushed = pipeline.finish();

    let status = run_status(driven.is_ok() && flushed.is_ok(), &options.shutdown);
    if let Some(ledger) = pipeline.ledger_mut() {
        ledger.finish(status)?;
    }

    driven?;
    let mut summary = flushed?;
    add_index_stats(&mut summary, iter.stats());
    Ok(summary)
}

/// Keeps up to `max_concurrent` downloads running and processes them as they finish
async fn drive_downloads(
    pipeline: &mut ProcessorPipeline,
    iter: &mut AggregatorIterator,
    max_concurrent: usize,
    options: &HarvestOptions,
) -> Result<(), HarvestError> {
    let mut downloads: JoinSet<Download> = JoinSet::new();
    let mut exhausted = false;

    loop {
        while !exhausted && downloads.len() < max_concurrent {
            let Some(record) = next_record(iter, &options.shutdown).await else {
                exhausted = true;
                break;
            };
            if pipeline.should_skip(&record)? {
                continue;
            }

            let downloader = pipeline.downloader().clone();
            downloads.spawn(async move {
                let result = downloader.download(&record).await;
                (record, result)
            });
        }

        let Some(joined) = downloads.join_next().await else {
            break;
        };
        match joined {
            Ok((record, result)) => {
                pipeline.process_downloaded(&record, result, &options.additional_info)?;
            }
            Err(e) => tracing::warn!("Download task failed: {}", e),
        }
    }

    Ok(())
}

async fn harvest_records(
    aggregator: &IndexAggregator,
    config: &Config,
    mut ledger: Option<Ledger>,
    options: &HarvestOptions,
) -> Result<RunSummary, HarvestError> {
    let mut streamer = JsonLinesStreamer::new(
        &config.output.directory,
        config.output.max_directory_size,
        config.output.max_file_size,
    );
    let mut summary = RunSummary::new();
    summary.run_id = ledger.as_ref().map(Ledger::run_id);

    let mut iter = aggregator.iter();
    let copied = copy_records(&mut iter, &mut streamer, &mut summary, &options.shutdown).await;
    let flushed = streamer.clean_up().map_err(HarvestError::from);

    let status = run_status(copied.is_ok() && flushed.is_ok(), &options.shutdown);
    if let Some(ledger) = ledger.as_mut() {
        ledger.finish(status)?;
    }

    copied?;
    flushed?;
    add_index_stats(&mut summary, iter.stats());
    Ok(summary)
}

async fn copy_records(
    iter: &mut AggregatorIterator,
    streamer: &mut dyn Streamer,
    summary: &mut RunSummary,
    shutdown: &CancellationToken,
) -> Result<(), HarvestError> {
    while let Some(record) = next_record(iter, shutdown).await {
        let Value::Object(data) = serde_json::to_value(&record).map_err(OutputError::from)? else {
            continue;
        };
        let metadata = PipeMetadata::new(record);
        if streamer.stream(&data, &metadata)?.is_some() {
            summary.streamed += 1;
        }
    }
    Ok(())
}
