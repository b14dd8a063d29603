//! Output streamer trait and run summary types
//!
//! Streamers receive every extracted document together with its metadata and
//! return an identifier for where it was written.

use crate::download::PipeMetadata;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Failed to format output: {0}")]
    Format(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for extracted documents
pub trait Streamer: Send {
    /// Writes one document
    ///
    /// # Arguments
    ///
    /// * `data` - The extracted fields
    /// * `metadata` - Metadata of the WARC record the fields came from
    ///
    /// # Returns
    ///
    /// * `Ok(Some(id))` - Where the document was written
    /// * `Ok(None)` - The streamer had nothing to write for this document
    fn stream(&mut self, data: &Map<String, Value>, metadata: &PipeMetadata) -> OutputResult<Option<String>>;

    /// Flushes and releases any open resources
    fn clean_up(&mut self) -> OutputResult<()>;
}

/// Counters for one harvest run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Option<i64>,

    // Index stage
    pub records_found: u64,
    pub pages_fetched: u64,
    pub pages_retried: u64,
    pub pages_dropped: u64,
    pub shards_skipped: u64,

    // Download stage
    pub records_skipped: u64,
    pub downloads_failed: u64,
    pub warc_records: u64,

    // Extraction stage
    pub extracted: u64,
    pub filtered: u64,
    pub unrouted: u64,
    pub streamed: u64,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that reached the download stage
    pub fn records_attempted(&self) -> u64 {
        self.records_found.saturating_sub(self.records_skipped)
    }

    /// Share of attempted downloads that succeeded, as a percentage
    pub fn download_success_rate(&self) -> f64 {
        let attempted = self.records_attempted();
        if attempted == 0 {
            return 0.0;
        }
        (attempted.saturating_sub(self.downloads_failed) as f64 / attempted as f64) * 100.0
    }

    /// Writes the summary to the log
    pub fn log(&self) {
        tracing::info!(
            run_id = ?self.run_id,
            found = self.records_found,
            skipped = self.records_skipped,
            failed = self.downloads_failed,
            extracted = self.extracted,
            filtered = self.filtered,
            unrouted = self.unrouted,
            streamed = self.streamed,
            "Harvest finished"
        );
        tracing::debug!(
            pages_fetched = self.pages_fetched,
            pages_retried = self.pages_retried,
            pages_dropped = self.pages_dropped,
            shards_skipped = self.shards_skipped,
            warc_records = self.warc_records,
            "Index statistics"
        );
    }
}
