use crate::config::types::{
    AggregatorConfig, Config, DownloaderConfig, ExtractorEntry, OutputConfig, RouteEntry,
    TargetEntry, TransformSpec, UserAgentConfig,
};
use crate::crawler::Shard;
use crate::pipeline::HTML_EXTRACTOR;
use crate::ConfigError;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_aggregator_config(&config.aggregator)?;
    validate_downloader_config(&config.downloader)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_targets(&config.targets)?;
    let names = validate_extractors(&config.extractors)?;
    validate_routes(&config.routes, &names)?;
    Ok(())
}

fn validate_window(
    what: &str,
    since: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<(), ConfigError> {
    if let (Some(since), Some(to)) = (since, to) {
        if since > to {
            return Err(ConfigError::Validation(format!(
                "{}: since ({}) is after to ({})",
                what, since, to
            )));
        }
    }
    Ok(())
}

fn validate_backoff(what: &str, max_retry: u32, sleep_base: f64) -> Result<(), ConfigError> {
    if max_retry > 20 {
        return Err(ConfigError::Validation(format!(
            "{} max_retry must be <= 20, got {}",
            what, max_retry
        )));
    }

    if !sleep_base.is_finite() || sleep_base < 1.0 {
        return Err(ConfigError::Validation(format!(
            "{} sleep_base must be a finite number >= 1.0, got {}",
            what, sleep_base
        )));
    }

    Ok(())
}

/// Validates index aggregation configuration
fn validate_aggregator_config(config: &AggregatorConfig) -> Result<(), ConfigError> {
    for server in &config.index_servers {
        Shard::parse(server).map_err(|e| ConfigError::Validation(e.to_string()))?;
    }

    if config.index_servers.is_empty() {
        Url::parse(&config.collection_index_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid collection_index_url: {}", e))
        })?;
    }

    validate_window("aggregator", config.since, config.to)?;
    validate_backoff("aggregator", config.max_retry, config.sleep_base)?;

    if config.prefetch_size > 64 {
        return Err(ConfigError::Validation(format!(
            "prefetch_size must be <= 64, got {}",
            config.prefetch_size
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.page_size == Some(0) {
        return Err(ConfigError::Validation(
            "page_size must be >= 1 when set".to_string(),
        ));
    }

    if let Some(filter) = config.filters.iter().find(|f| f.trim().is_empty()) {
        return Err(ConfigError::InvalidPattern(format!(
            "Empty index filter: '{}'",
            filter
        )));
    }

    Ok(())
}

/// Validates downloader configuration
fn validate_downloader_config(config: &DownloaderConfig) -> Result<(), ConfigError> {
    Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if config.max_concurrent_downloads < 1 || config.max_concurrent_downloads > 256 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_downloads must be between 1 and 256, got {}",
            config.max_concurrent_downloads
        )));
    }

    if let Some(label) = &config.encoding {
        if encoding_rs::Encoding::for_label(label.as_bytes()).is_none() {
            return Err(ConfigError::Validation(format!(
                "Unknown encoding '{}'",
                label
            )));
        }
    }

    validate_backoff("downloader", config.max_retry, config.sleep_base)
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "output directory cannot be empty".to_string(),
        ));
    }

    if config.max_directory_size < 1 {
        return Err(ConfigError::Validation(
            "max_directory_size must be >= 1".to_string(),
        ));
    }

    if config.max_file_size < 1 {
        return Err(ConfigError::Validation(
            "max_file_size must be >= 1".to_string(),
        ));
    }

    if config.ledger_path.as_deref() == Some("") {
        return Err(ConfigError::Validation(
            "ledger_path cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates target entries
fn validate_targets(targets: &[TargetEntry]) -> Result<(), ConfigError> {
    if targets.is_empty() {
        return Err(ConfigError::Validation(
            "At least one [[target]] is required".to_string(),
        ));
    }

    for target in targets {
        let url = target.url.trim();
        if url.is_empty() || url.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidUrl(format!(
                "Invalid target '{}'",
                target.url
            )));
        }
    }

    Ok(())
}

/// Validates extractor definitions, returning every usable extractor name
fn validate_extractors(extractors: &[ExtractorEntry]) -> Result<HashSet<String>, ConfigError> {
    let mut names = HashSet::new();
    names.insert(HTML_EXTRACTOR.to_string());

    for extractor in extractors {
        if extractor.name.is_empty() {
            return Err(ConfigError::Validation(
                "extractor name cannot be empty".to_string(),
            ));
        }

        if !names.insert(extractor.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate or reserved extractor name '{}'",
                extractor.name
            )));
        }

        if extractor.allowed_status.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Extractor '{}' must allow at least one status",
                extractor.name
            )));
        }

        for field in &extractor.fields {
            Selector::parse(&field.selector).map_err(|e| {
                ConfigError::InvalidPattern(format!(
                    "Invalid selector '{}' in extractor '{}': {:?}",
                    field.selector, extractor.name, e
                ))
            })?;

            for transform in &field.transforms {
                if let TransformSpec::RegexReplace { pattern, .. } = transform {
                    Regex::new(pattern).map_err(|e| {
                        ConfigError::InvalidPattern(format!(
                            "Invalid regex '{}' in extractor '{}': {}",
                            pattern, extractor.name, e
                        ))
                    })?;
                }
            }
        }
    }

    Ok(names)
}

/// Validates route entries against the known extractor names
fn validate_routes(routes: &[RouteEntry], extractors: &HashSet<String>) -> Result<(), ConfigError> {
    for route in routes {
        Regex::new(&route.pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("Invalid route pattern '{}': {}", route.pattern, e))
        })?;

        if !extractors.contains(&route.extractor) {
            return Err(ConfigError::Validation(format!(
                "Route '{}' refers to unknown extractor '{}'",
                route.pattern, route.extractor
            )));
        }

        validate_window("route", route.since, route.to)?;
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
