//! Download -> route -> extract -> stream for one index record at a time

use crate::download::{Downloader, PipeMetadata};
use crate::output::{RunSummary, Streamer};
use crate::pipeline::router::Router;
use crate::pipeline::RouteError;
use crate::record::{format_cdx_timestamp, DomainRecord};
use crate::storage::{ProcessedRecord, RunStatus, SqliteStorage, Storage, StorageResult};
use crate::url::{capture_key, extract_domain};
use crate::{DownloadError, HarvestError};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Processed-record ledger bound to one run
pub struct Ledger {
    storage: SqliteStorage,
    run_id: i64,
}

impl Ledger {
    /// Opens a run in `storage`
    pub fn start(mut storage: SqliteStorage, config_hash: &str) -> StorageResult<Self> {
        let run_id = storage.create_run(config_hash)?;
        tracing::info!(run_id, "Started harvest run");
        Ok(Self { storage, run_id })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Returns true if a capture with this key was streamed, in this run or an earlier one
    pub fn contains(&self, url_key: &str) -> StorageResult<bool> {
        self.storage.is_processed(url_key)
    }

    fn mark(&mut self, url_key: String, url: &str, record: &DomainRecord, output_id: &str) -> StorageResult<bool> {
        self.storage.mark_processed(&ProcessedRecord {
            url_key,
            url: url.to_string(),
            timestamp: record.timestamp.map(format_cdx_timestamp),
            filename: record.filename.clone(),
            offset: record.offset,
            length: record.length,
            output_id: output_id.to_string(),
            run_id: self.run_id,
        })
    }

    /// Records how the run ended
    pub fn finish(&mut self, status: RunStatus) -> StorageResult<()> {
        match status {
            RunStatus::Completed => self.storage.complete_run(self.run_id),
            other => self.storage.update_run_status(self.run_id, other),
        }
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("run_id", &self.run_id).finish()
    }
}

fn record_key(record: &DomainRecord) -> Option<String> {
    record.url.as_deref().and_then(|url| capture_key(url).ok())
}

/// Runs downloaded captures through routing, extraction and output
pub struct ProcessorPipeline {
    downloader: Downloader,
    router: Router,
    streamer: Box<dyn Streamer>,
    ledger: Option<Ledger>,
    /// Keys of records between `should_skip` and the end of their processing
    in_flight: HashSet<String>,
    summary: RunSummary,
}

impl ProcessorPipeline {
    pub fn new(downloader: Downloader, router: Router, streamer: Box<dyn Streamer>) -> Self {
        Self {
            downloader,
            router,
            streamer,
            ledger: None,
            in_flight: HashSet::new(),
            summary: RunSummary::new(),
        }
    }

    /// Skips records already in `ledger` and records every streamed capture
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.summary.run_id = Some(ledger.run_id());
        self.ledger = Some(ledger);
        self
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub fn ledger_mut(&mut self) -> Option<&mut Ledger> {
        self.ledger.as_mut()
    }

    /// Download and extraction counters so far
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Returns true if this record was already streamed or is being processed
    ///
    /// A record that is not skipped stays claimed until `process_downloaded`
    /// returns for it, so a second capture of the same URL downloaded
    /// concurrently is skipped instead of streamed twice.
    pub fn should_skip(&mut self, record: &DomainRecord) -> Result<bool, HarvestError> {
        let (Some(ledger), Some(key)) = (self.ledger.as_ref(), record_key(record)) else {
            return Ok(false);
        };
        if self.in_flight.contains(&key) || ledger.contains(&key)? {
            self.summary.records_skipped += 1;
            tracing::debug!(url = %key, "Skipping capture already in ledger");
            return Ok(true);
        }
        self.in_flight.insert(key);
        Ok(false)
    }

    /// Downloads and processes one index record
    ///
    /// # Arguments
    ///
    /// * `record` - The index record to fetch
    /// * `additional_info` - Fields merged into every extracted document
    ///
    /// # Returns
    ///
    /// * `Ok(ids)` - Output identifiers of the streamed documents; empty when the
    ///   download failed or every capture was filtered
    /// * `Err(HarvestError)` - Output or ledger I/O failed
    pub async fn process_domain_record(
        &mut self,
        record: &DomainRecord,
        additional_info: &Map<String, Value>,
    ) -> Result<Vec<String>, HarvestError> {
        if self.should_skip(record)? {
            return Ok(Vec::new());
        }
        let downloaded = self.downloader.download(record).await;
        self.process_downloaded(record, downloaded, additional_info)
    }

    /// Processes the outcome of a download started elsewhere
    pub fn process_downloaded(
        &mut self,
        record: &DomainRecord,
        downloaded: Result<Vec<(String, PipeMetadata)>, DownloadError>,
        additional_info: &Map<String, Value>,
    ) -> Result<Vec<String>, HarvestError> {
        let result = self.process_captures(record, downloaded, additional_info);
        if let Some(key) = record_key(record) {
            self.in_flight.remove(&key);
        }
        result
    }

    fn process_captures(
        &mut self,
        record: &DomainRecord,
        downloaded: Result<Vec<(String, PipeMetadata)>, DownloadError>,
        additional_info: &Map<String, Value>,
    ) -> Result<Vec<String>, HarvestError> {
        let captures = match downloaded {
            Ok(captures) => captures,
            Err(e) => {
                self.summary.downloads_failed += 1;
                tracing::warn!(
                    filename = %record.filename,
                    offset = record.offset,
                    status = e.status,
                    kind = ?e.kind,
                    "Failed to download capture: {}",
                    e.reason
                );
                return Ok(Vec::new());
            }
        };

        let mut ids = Vec::new();
        for (text, mut metadata) in captures {
            self.summary.warc_records += 1;
            if !metadata.is_response() {
                continue;
            }

            let url = match metadata.url() {
                Some(url) => url.to_string(),
                None => {
                    tracing::debug!(filename = %record.filename, "Response record without URL");
                    continue;
                }
            };

            let extractor = match self.router.route(&url, metadata.timestamp(), &metadata) {
                Ok(extractor) => extractor,
                Err(RouteError::NoMatch { .. }) => {
                    self.summary.unrouted += 1;
                    tracing::debug!(url = %url, "No route for capture");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            metadata.name = Some(extractor.name().to_string());
            metadata.article_data = additional_info.clone();

            let Some(mut data) = extractor.extract(&text, &metadata) else {
                self.summary.filtered += 1;
                tracing::debug!(url = %url, extractor = extractor.name(), "Capture filtered");
                continue;
            };
            self.summary.extracted += 1;

            for (key, value) in additional_info {
                data.entry(key.clone()).or_insert_with(|| value.clone());
            }
            data.insert("url".to_string(), Value::String(url.clone()));
            if let Some(domain) = metadata.url_parsed.as_ref().and_then(extract_domain) {
                data.entry("domain".to_string()).or_insert(Value::String(domain));
            }
            data.insert(
                "timestamp".to_string(),
                metadata
                    .timestamp()
                    .map_or(Value::Null, |ts| Value::String(ts.to_rfc3339())),
            );

            let key = capture_key(&url).ok();
            if let (Some(ledger), Some(key)) = (self.ledger.as_ref(), key.as_deref()) {
                if ledger.contains(key)? {
                    self.summary.records_skipped += 1;
                    tracing::debug!(url = %url, "Capture already in ledger");
                    continue;
                }
            }

            let Some(id) = self.streamer.stream(&data, &metadata)? else {
                continue;
            };
            self.summary.streamed += 1;

            if let (Some(ledger), Some(key)) = (self.ledger.as_mut(), key) {
                if !ledger.mark(key, &url, record, &id)? {
                    tracing::warn!(url = %url, output_id = %id, "Ledger already held this capture");
                }
            }
            ids.push(id);
        }

        Ok(ids)
    }

    /// Flushes the streamer and returns the run counters
    pub fn finish(&mut self) -> Result<RunSummary, HarvestError> {
        self.streamer.clean_up()?;
        Ok(self.summary.clone())
    }
}
