//! Extractors turn a downloaded page into a document of named fields
//!
//! Rule-based extractors are built from `[[extractor]]` configuration entries and
//! select fields with CSS selectors. The built-in `html` extractor passes the page
//! through unchanged.

use crate::config::{ExtractorEntry, FieldEntry};
use crate::download::PipeMetadata;
use crate::pipeline::transform::{apply_all, compile_all, Transform};
use crate::pipeline::HTML_EXTRACTOR;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Turns page text into structured fields
pub trait Extractor: Send + Sync {
    /// Name the extractor is registered and routed under
    fn name(&self) -> &str;

    /// Extracts fields from `html`
    ///
    /// # Returns
    ///
    /// * `Some(fields)` - The page produced a document
    /// * `None` - The page was filtered out
    fn extract(&self, html: &str, metadata: &PipeMetadata) -> Option<Map<String, Value>>;
}

fn status_allowed(allowed: &[u16], metadata: &PipeMetadata) -> bool {
    // Records without a parsed status line are not filtered
    metadata.http_status.map_or(true, |status| allowed.contains(&status))
}

/// Passes the page through as `{"html": ...}`
#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    allowed_status: Vec<u16>,
}

impl HtmlExtractor {
    pub fn new() -> Self {
        Self {
            allowed_status: vec![200],
        }
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for HtmlExtractor {
    fn name(&self) -> &str {
        HTML_EXTRACTOR
    }

    fn extract(&self, html: &str, metadata: &PipeMetadata) -> Option<Map<String, Value>> {
        if !status_allowed(&self.allowed_status, metadata) {
            return None;
        }
        let mut fields = Map::new();
        fields.insert("html".to_string(), Value::String(html.to_string()));
        Some(fields)
    }
}

/// One compiled field rule
#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    selector: Selector,
    attribute: Option<String>,
    multiple: bool,
    required: bool,
    transforms: Vec<Transform>,
}

impl FieldRule {
    fn compile(entry: &FieldEntry) -> Result<Self, ConfigError> {
        let selector = Selector::parse(&entry.selector).map_err(|e| {
            ConfigError::InvalidPattern(format!("selector '{}': {:?}", entry.selector, e))
        })?;
        Ok(Self {
            name: entry.name.clone(),
            selector,
            attribute: entry.attribute.clone(),
            multiple: entry.multiple,
            required: entry.required,
            transforms: compile_all(&entry.transforms)?,
        })
    }

    fn value_of(&self, element: ElementRef<'_>) -> Option<String> {
        let raw = match &self.attribute {
            Some(attr) => element.value().attr(attr)?.to_string(),
            None => element.text().collect::<String>(),
        };
        let value = apply_all(&self.transforms, &raw);
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    }

    /// Returns None when a required field has no value
    fn select(&self, document: &Html) -> Option<Value> {
        let mut values = document
            .select(&self.selector)
            .filter_map(|element| self.value_of(element));

        if self.multiple {
            let values: Vec<Value> = values.map(Value::String).collect();
            if values.is_empty() && self.required {
                return None;
            }
            return Some(Value::Array(values));
        }

        match values.next() {
            Some(value) => Some(Value::String(value)),
            None if self.required => None,
            None => Some(Value::Null),
        }
    }
}

/// Extractor driven by CSS selector rules
#[derive(Debug, Clone)]
pub struct RuleExtractor {
    name: String,
    allowed_status: Vec<u16>,
    fields: Vec<FieldRule>,
}

impl RuleExtractor {
    /// Compiles an `[[extractor]]` entry
    ///
    /// # Arguments
    ///
    /// * `entry` - The configured extractor
    ///
    /// # Returns
    ///
    /// * `Ok(RuleExtractor)` - Every selector and transform compiled
    /// * `Err(ConfigError)` - A selector or regex is invalid
    pub fn from_config(entry: &ExtractorEntry) -> Result<Self, ConfigError> {
        let fields = entry
            .fields
            .iter()
            .map(FieldRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: entry.name.clone(),
            allowed_status: entry.allowed_status.clone(),
            fields,
        })
    }
}

impl Extractor for RuleExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, html: &str, metadata: &PipeMetadata) -> Option<Map<String, Value>> {
        if !status_allowed(&self.allowed_status, metadata) {
            return None;
        }

        let document = Html::parse_document(html);
        let mut fields = Map::new();
        for rule in &self.fields {
            let value = rule.select(&document)?;
            fields.insert(rule.name.clone(), value);
        }
        Some(fields)
    }
}

/// Extractors by name
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// A registry holding only the built-in `html` extractor
    pub fn new() -> Self {
        let mut registry = Self {
            extractors: HashMap::new(),
        };
        registry.register(Arc::new(HtmlExtractor::new()));
        registry
    }

    /// Builds the built-ins plus every configured extractor
    pub fn from_config(entries: &[ExtractorEntry]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for entry in entries {
            if registry.get(&entry.name).is_some() {
                return Err(ConfigError::Validation(format!(
                    "extractor '{}' is defined more than once",
                    entry.name
                )));
            }
            registry.register(Arc::new(RuleExtractor::from_config(entry)?));
        }
        Ok(registry)
    }

    /// Adds an extractor, replacing any with the same name
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(extractor.name().to_string(), extractor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &self.names())
            .finish()
    }
}
