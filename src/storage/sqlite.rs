//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{ProcessedRecord, RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            config_hash: row.get(3)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                .unwrap_or(RunStatus::Running),
        })
    }

    fn count(&self, sql: &str, params: impl rusqlite::Params) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, params, |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                Self::run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                Self::run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let finished_at = match status {
            RunStatus::Running => None,
            _ => Some(Utc::now().to_rfc3339()),
        };
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), finished_at, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn complete_run(&mut self, run_id: i64) -> StorageResult<()> {
        self.update_run_status(run_id, RunStatus::Completed)
    }

    fn count_runs(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM runs", [])
    }

    // ===== Processed Records =====

    fn is_processed(&self, url_key: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM processed_records WHERE url_key = ?1",
                params![url_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_processed(&mut self, record: &ProcessedRecord) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO processed_records
             (url_key, url, timestamp, filename, byte_offset, byte_length, output_id, run_id, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.url_key,
                record.url,
                record.timestamp,
                record.filename,
                record.offset as i64,
                record.length as i64,
                record.output_id,
                record.run_id,
                now
            ],
        )?;
        Ok(inserted > 0)
    }

    fn count_processed(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM processed_records", [])
    }

    fn count_processed_in_run(&self, run_id: i64) -> StorageResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM processed_records WHERE run_id = ?1",
            params![run_id],
        )
    }
}
