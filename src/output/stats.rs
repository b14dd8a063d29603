//! Statistics generation from the harvest ledger
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the storage layer.

use crate::storage::{RunRecord, Storage, StorageResult};

/// Ledger statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Number of runs recorded
    pub total_runs: u64,

    /// Captures streamed across all runs
    pub total_processed: u64,

    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,

    /// Captures streamed by the most recent run
    pub latest_run_processed: u64,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<HarvestStatistics> {
    let total_runs = storage.count_runs()?;
    let total_processed = storage.count_processed()?;
    let latest_run = storage.get_latest_run()?;
    let latest_run_processed = match &latest_run {
        Some(run) => storage.count_processed_in_run(run.id)?,
        None => 0,
    };

    Ok(HarvestStatistics {
        total_runs,
        total_processed,
        latest_run,
        latest_run_processed,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Runs recorded: {}", stats.total_runs);
    println!("  Captures streamed: {}", stats.total_processed);
    println!();

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run (#{}):", run.id);
            println!("  Status: {}", run.status.to_db_string());
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            println!("  Config hash: {}", run.config_hash);
            println!("  Captures streamed: {}", stats.latest_run_processed);
        }
        None => println!("No runs recorded yet."),
    }
}
