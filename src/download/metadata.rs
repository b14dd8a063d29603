use crate::record::DomainRecord;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use url::Url;

/// Everything known about one WARC record as it moves through the pipeline
#[derive(Debug, Clone)]
pub struct PipeMetadata {
    /// The index record the WARC slice was fetched for
    pub domain_record: DomainRecord,

    /// Extra fields merged into every extracted document
    pub article_data: Map<String, Value>,

    /// WARC record headers, keyed by canonical header name
    pub warc_header: BTreeMap<String, String>,

    /// HTTP response headers, keyed by lowercase name
    pub http_header: BTreeMap<String, String>,

    /// HTTP status of a `response` record
    pub http_status: Option<u16>,

    /// `WARC-Type` of the record
    pub rec_type: Option<String>,

    /// Name of the encoding the payload was decoded with
    pub encoding: String,

    /// Name of the extractor chosen by the router
    pub name: Option<String>,

    pub url_parsed: Option<Url>,
}

impl PipeMetadata {
    pub fn new(domain_record: DomainRecord) -> Self {
        let url_parsed = domain_record.url.as_deref().and_then(|u| Url::parse(u).ok());
        Self {
            domain_record,
            article_data: Map::new(),
            warc_header: BTreeMap::new(),
            http_header: BTreeMap::new(),
            http_status: None,
            rec_type: None,
            encoding: "utf-8".to_string(),
            name: None,
            url_parsed,
        }
    }

    pub fn is_response(&self) -> bool {
        self.rec_type.as_deref() == Some("response")
    }

    /// The captured URL: `WARC-Target-URI`, falling back to the index record
    pub fn url(&self) -> Option<&str> {
        self.warc_header
            .get("WARC-Target-URI")
            .map(String::as_str)
            .or(self.domain_record.url.as_deref())
    }

    /// Capture time from the index record
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.domain_record.timestamp
    }
}
