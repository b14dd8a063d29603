//! Configuration module for cc-harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use cc_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Prefetching {} pairs ahead", config.aggregator.prefetch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AggregatorConfig, Config, DownloaderConfig, ExtractorEntry, FieldEntry, OutputConfig,
    OutputFormat, RouteEntry, TargetEntry, TransformSpec, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, parse_config, parse_config_date,
};
