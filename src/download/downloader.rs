//! Range downloads of WARC records
//!
//! For each index record the downloader:
//! 1. Fetches exactly `offset ..= offset + length - 1` of `base_url + filename`
//! 2. Gunzips the slice and parses its WARC records
//! 3. Splits `response` blocks into HTTP status, headers and payload
//! 4. Optionally verifies `WARC-Payload-Digest`
//! 5. Decodes the payload to text

use super::digest::verify_payload_digest;
use super::metadata::PipeMetadata;
use super::archive::{decompress, read_records, split_http_response};
use crate::config::DownloaderConfig;
use crate::crawler::{retrieve_bytes, HttpSession, RequestContext, RetryPolicy};
use crate::record::DomainRecord;
use crate::DownloadError;
use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Bytes of payload scanned for a `<meta charset>` declaration
const META_SNIFF_LEN: usize = 2048;

fn meta_charset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i-u)<meta[^>]+charset\s*=\s*["']?\s*([A-Za-z0-9_.:-]+)"#)
            .expect("static charset pattern is valid")
    })
}

fn charset_from_content_type(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, value)| Encoding::for_label(value.trim().trim_matches('"').as_bytes()))
}

fn charset_from_meta(payload: &[u8]) -> Option<&'static Encoding> {
    let head = &payload[..payload.len().min(META_SNIFF_LEN)];
    meta_charset_pattern()
        .captures(head)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Encoding::for_label(m.as_bytes()))
}

/// Picks the payload encoding
///
/// Priority: configured, index record, HTTP `Content-Type` charset, `<meta>`
/// declaration, UTF-8.
pub fn resolve_encoding(
    configured: Option<&'static Encoding>,
    record_encoding: Option<&str>,
    content_type: Option<&str>,
    payload: &[u8],
) -> &'static Encoding {
    configured
        .or_else(|| record_encoding.and_then(|label| Encoding::for_label(label.trim().as_bytes())))
        .or_else(|| content_type.and_then(charset_from_content_type))
        .or_else(|| charset_from_meta(payload))
        .unwrap_or(UTF_8)
}

/// Fetches and unwraps the WARC records behind index records
#[derive(Debug, Clone)]
pub struct Downloader {
    session: HttpSession,
    base_url: String,
    policy: RetryPolicy,
    digest_verification: bool,
    encoding: Option<&'static Encoding>,
}

impl Downloader {
    pub fn new(session: HttpSession, base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            session,
            base_url: base_url.into(),
            policy,
            digest_verification: false,
            encoding: None,
        }
    }

    /// Builds a downloader from the `[downloader]` section
    pub fn from_config(session: HttpSession, config: &DownloaderConfig) -> Result<Self, DownloadError> {
        let policy = RetryPolicy::new(
            config.max_retry,
            config.sleep_base,
            Duration::from_millis(config.sleep_unit_ms),
        );
        Self::new(session, config.base_url.clone(), policy)
            .with_digest_verification(config.digest_verification)
            .with_encoding(config.encoding.as_deref())
    }

    pub fn with_digest_verification(mut self, enabled: bool) -> Self {
        self.digest_verification = enabled;
        self
    }

    /// Forces every payload to be decoded with `label`
    pub fn with_encoding(mut self, label: Option<&str>) -> Result<Self, DownloadError> {
        self.encoding = match label {
            Some(label) => Some(Encoding::for_label(label.as_bytes()).ok_or_else(|| {
                DownloadError::fatal(0, format!("unknown encoding '{}'", label))
            })?),
            None => None,
        };
        Ok(self)
    }

    /// Archive URL of the file holding `record`
    pub fn record_url(&self, record: &DomainRecord) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            record.filename.trim_start_matches('/')
        )
    }

    /// Downloads `record` and returns the text of each WARC record in its slice
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<(String, PipeMetadata)>)` - One entry per WARC record, in slice order
    /// * `Err(DownloadError)` - Fetch failed after retries, the record has zero
    ///   length, or the slice failed decompression, parsing or digest checks
    pub async fn download(
        &self,
        record: &DomainRecord,
    ) -> Result<Vec<(String, PipeMetadata)>, DownloadError> {
        let range = record.byte_range().ok_or_else(|| {
            DownloadError::fatal(0, format!("record in {} has zero length", record.filename))
        })?;

        let url = self.record_url(record);
        let ctx = RequestContext::new(record.url.clone().unwrap_or_default(), record.filename.as_str());
        let raw = retrieve_bytes(&self.session, &url, &[("Range", range)], &self.policy, &ctx).await?;

        let data = decompress(&raw)?;
        let entries = read_records(&data)?;

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut metadata = PipeMetadata::new(record.clone());
            metadata.rec_type = entry.rec_type.clone();
            if let Some(target) = entry.headers.get("WARC-Target-URI") {
                if let Ok(parsed) = url::Url::parse(target) {
                    metadata.url_parsed = Some(parsed);
                }
            }

            let text = if metadata.is_response() {
                let response = split_http_response(&entry.block);

                if self.digest_verification {
                    if let Some(declared) = entry.headers.get("WARC-Payload-Digest") {
                        verify_payload_digest(declared, response.payload)?;
                    }
                }

                let encoding = resolve_encoding(
                    self.encoding,
                    record.encoding.as_deref(),
                    response.headers.get("content-type").map(String::as_str),
                    response.payload,
                );
                let (text, _, had_errors) = encoding.decode(response.payload);
                if had_errors {
                    tracing::debug!(
                        url = %url,
                        encoding = encoding.name(),
                        "Payload contained undecodable bytes"
                    );
                }

                metadata.http_status = response.status;
                metadata.http_header = response.headers.clone();
                metadata.encoding = encoding.name().to_string();
                text.into_owned()
            } else {
                String::from_utf8_lossy(&entry.block).into_owned()
            };

            metadata.warc_header = entry.headers;
            results.push((text, metadata));
        }

        tracing::debug!(
            url = %url,
            offset = record.offset,
            length = record.length,
            records = results.len(),
            "Downloaded WARC slice"
        );
        Ok(results)
    }
}
