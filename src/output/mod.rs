//! Output module for streaming extracted documents
//!
//! This module handles:
//! - Writing documents as JSON lines or standalone HTML files
//! - Summarizing a harvest run
//! - Reporting ledger statistics

mod html;
mod jsonl;
pub mod stats;
mod traits;

pub use html::HtmlStreamer;
pub use jsonl::JsonLinesStreamer;
pub use stats::{load_statistics, print_statistics, HarvestStatistics};
pub use traits::{OutputError, OutputResult, RunSummary, Streamer};

use crate::config::{OutputConfig, OutputFormat};

/// Builds the streamer selected by the `[output]` section
///
/// # Arguments
///
/// * `config` - The output configuration
///
/// # Returns
///
/// A boxed streamer writing below `config.directory`
pub fn build_streamer(config: &OutputConfig) -> Box<dyn Streamer> {
    match config.format {
        OutputFormat::Jsonl => Box::new(JsonLinesStreamer::new(
            &config.directory,
            config.max_directory_size,
            config.max_file_size,
        )),
        OutputFormat::Html => Box::new(HtmlStreamer::new(
            &config.directory,
            config.max_directory_size,
        )),
    }
}
