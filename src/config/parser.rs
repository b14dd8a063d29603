use crate::config::types::Config;
use crate::config::validation::validate;
use crate::record::parse_cdx_timestamp;
use crate::ConfigError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use cc_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Targets: {}", config.targets.len());
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Stored with each run in the ledger so runs with different settings can be told apart.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Parses a date bound from the configuration
///
/// Accepted forms:
/// - RFC 3339 (`2022-01-01T00:00:00Z`)
/// - Local date-time, read as UTC (`2022-01-01T12:30:00`)
/// - Date only (`2022-01-01`); start of day, or end of day when `end_of_day` is set
/// - CDX timestamp (`20220101000000`)
pub fn parse_config_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc());
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        return time
            .map(|t| t.and_utc())
            .ok_or_else(|| format!("invalid date '{}'", value));
    }

    if value.len() == 14 && value.chars().all(|c| c.is_ascii_digit()) {
        if let Some(dt) = parse_cdx_timestamp(value) {
            return Ok(dt);
        }
    }

    Err(format!(
        "invalid date '{}': expected RFC 3339, YYYY-MM-DD or YYYYMMDDhhmmss",
        value
    ))
}
