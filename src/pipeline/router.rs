//! Routes downloaded pages to extractors by URL pattern and capture time

use crate::config::Config;
use crate::download::PipeMetadata;
use crate::pipeline::extractor::{Extractor, ExtractorRegistry};
use crate::pipeline::{RouteError, HTML_EXTRACTOR};
use crate::ConfigError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::Arc;

/// A compiled `[[route]]` entry
#[derive(Debug, Clone)]
pub struct Route {
    pattern: Regex,
    extractor: String,
    since: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

impl Route {
    pub fn new(
        pattern: &str,
        extractor: impl Into<String>,
        since: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Self, ConfigError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ConfigError::InvalidPattern(format!("route '{}': {}", pattern, e)))?;
        Ok(Self {
            pattern,
            extractor: extractor.into(),
            since,
            to,
        })
    }

    pub fn extractor(&self) -> &str {
        &self.extractor
    }

    /// A capture without timestamp matches any window
    pub fn matches(&self, url: &str, timestamp: Option<DateTime<Utc>>) -> bool {
        if !self.pattern.is_match(url) {
            return false;
        }
        match timestamp {
            Some(ts) => {
                self.since.map_or(true, |since| ts >= since) && self.to.map_or(true, |to| ts <= to)
            }
            None => true,
        }
    }
}

/// Ordered route table; the first matching route wins
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<Route>,
    registry: ExtractorRegistry,
}

impl Router {
    pub fn new(registry: ExtractorRegistry) -> Self {
        Self {
            routes: Vec::new(),
            registry,
        }
    }

    /// Builds the extractor registry and route table from configuration
    ///
    /// Without any `[[route]]` entries every page is routed to the built-in
    /// `html` extractor.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let registry = ExtractorRegistry::from_config(&config.extractors)?;
        let mut router = Self::new(registry);

        if config.routes.is_empty() {
            router.add_route(Route::new(".*", HTML_EXTRACTOR, None, None)?)?;
        }
        for entry in &config.routes {
            router.add_route(Route::new(&entry.pattern, &entry.extractor, entry.since, entry.to)?)?;
        }
        Ok(router)
    }

    /// Appends a route; its extractor must already be registered
    pub fn add_route(&mut self, route: Route) -> Result<(), ConfigError> {
        if self.registry.get(route.extractor()).is_none() {
            return Err(ConfigError::Validation(format!(
                "route '{}' refers to unknown extractor '{}'",
                route.pattern, route.extractor
            )));
        }
        self.routes.push(route);
        Ok(())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Picks the extractor for a capture
    ///
    /// # Arguments
    ///
    /// * `url` - The captured URL
    /// * `timestamp` - Capture time, if known
    /// * `metadata` - The page's pipeline metadata
    ///
    /// # Returns
    ///
    /// * `Ok(extractor)` - The first route matching both URL and time window
    /// * `Err(RouteError::NoMatch)` - No route accepts the capture
    pub fn route(
        &self,
        url: &str,
        timestamp: Option<DateTime<Utc>>,
        metadata: &PipeMetadata,
    ) -> Result<Arc<dyn Extractor>, RouteError> {
        let route = self
            .routes
            .iter()
            .find(|route| route.matches(url, timestamp))
            .ok_or_else(|| RouteError::NoMatch {
                url: url.to_string(),
            })?;

        tracing::trace!(
            url = %url,
            extractor = route.extractor(),
            rec_type = ?metadata.rec_type,
            "Routed capture"
        );

        self.registry
            .get(route.extractor())
            .ok_or_else(|| RouteError::UnknownExtractor {
                name: route.extractor().to_string(),
            })
    }
}
