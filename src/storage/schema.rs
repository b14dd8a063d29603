//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the harvest ledger.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Records already streamed, keyed by unified URL id
CREATE TABLE IF NOT EXISTS processed_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_key TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    timestamp TEXT,
    filename TEXT NOT NULL,
    byte_offset INTEGER NOT NULL,
    byte_length INTEGER NOT NULL,
    output_id TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    processed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processed_run ON processed_records(run_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", get_schema_version())?;
    Ok(())
}

/// Gets the current schema version
pub fn get_schema_version() -> u32 {
    1
}
