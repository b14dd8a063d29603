//! Storage traits and error types
//!
//! This module defines the trait interface for the processed-record ledger and
//! associated error types.

use crate::storage::{ProcessedRecord, RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for ledger backends
///
/// The ledger remembers which captures were already streamed so repeated runs
/// over overlapping index windows do not write duplicates.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new harvest run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Marks a run as completed with a finish timestamp
    fn complete_run(&mut self, run_id: i64) -> StorageResult<()>;

    /// Counts all runs
    fn count_runs(&self) -> StorageResult<u64>;

    // ===== Processed Records =====

    /// Returns true if a record with this unified URL id was already streamed
    fn is_processed(&self, url_key: &str) -> StorageResult<bool>;

    /// Records that a capture was streamed
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The record was added
    /// * `Ok(false)` - A record with the same `url_key` already existed
    fn mark_processed(&mut self, record: &ProcessedRecord) -> StorageResult<bool>;

    /// Counts every processed record
    fn count_processed(&self) -> StorageResult<u64>;

    /// Counts records processed by one run
    fn count_processed_in_run(&self, run_id: i64) -> StorageResult<u64>;
}
