//! Storage module for the processed-record ledger
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Run tracking (running, completed, failed)
//! - Deduplication of streamed captures across runs

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use std::path::Path;

/// Initializes or opens a ledger database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// A capture that was streamed to output
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    /// `unify_url_id` of the capture URL
    pub url_key: String,
    pub url: String,
    pub timestamp: Option<String>,
    pub filename: String,
    pub offset: u64,
    pub length: u64,
    /// Identifier returned by the streamer
    pub output_id: String,
    pub run_id: i64,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
