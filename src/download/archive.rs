//! Unwrapping of downloaded WARC slices
//!
//! A range fetch returns one gzip member (sometimes several) holding a WARC
//! record. `response` records carry a raw HTTP response: status line, headers,
//! blank line, payload.

use crate::DownloadError;
use flate2::read::MultiGzDecoder;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Read;
use warc::{WarcHeader, WarcReader};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Restores the conventional spelling of a WARC header name
///
/// The reader lowercases every name; `warc-target-uri` becomes `WARC-Target-URI`.
fn canonical_header_name(header: &WarcHeader) -> String {
    header
        .to_string()
        .split('-')
        .map(|part| match part {
            "warc" | "uri" | "id" | "ip" => part.to_ascii_uppercase(),
            _ => {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// One parsed WARC record
#[derive(Debug, Clone)]
pub struct WarcEntry {
    pub headers: BTreeMap<String, String>,
    pub rec_type: Option<String>,
    pub block: Vec<u8>,
}

/// An HTTP response split out of a `response` record block
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse<'a> {
    pub status: Option<u16>,
    /// Header names lowercased; repeated headers are joined with ", "
    pub headers: BTreeMap<String, String>,
    pub payload: &'a [u8],
}

/// Gunzips `data` when it starts with the gzip magic, otherwise returns it as is
pub fn decompress(data: &[u8]) -> Result<Cow<'_, [u8]>, DownloadError> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(Cow::Borrowed(data));
    }
    let mut out = Vec::with_capacity(data.len() * 4);
    MultiGzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| DownloadError::integrity(format!("gzip decoding failed: {}", e)))?;
    Ok(Cow::Owned(out))
}

/// Parses every WARC record in `data`
///
/// A slice that holds no record, or a record that fails to parse, is an
/// integrity failure.
pub fn read_records(data: &[u8]) -> Result<Vec<WarcEntry>, DownloadError> {
    let mut entries = Vec::new();
    for record in WarcReader::new(data).iter_records() {
        let record =
            record.map_err(|e| DownloadError::integrity(format!("malformed WARC record: {}", e)))?;

        let (raw_headers, block) = record.into_raw_parts();
        let headers: BTreeMap<String, String> = raw_headers
            .headers
            .iter()
            .map(|(key, value)| {
                (
                    canonical_header_name(key),
                    String::from_utf8_lossy(value).trim().to_string(),
                )
            })
            .collect();
        let rec_type = headers.get("WARC-Type").cloned();

        entries.push(WarcEntry {
            headers,
            rec_type,
            block,
        });
    }

    if entries.is_empty() {
        return Err(DownloadError::integrity("no WARC record in downloaded range"));
    }
    Ok(entries)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits an HTTP response block into status, headers and payload
///
/// Blocks without a header terminator are treated as payload only.
pub fn split_http_response(block: &[u8]) -> HttpResponse<'_> {
    let split = find(block, b"\r\n\r\n")
        .map(|pos| (pos, pos + 4))
        .or_else(|| find(block, b"\n\n").map(|pos| (pos, pos + 2)));

    let Some((head_end, body_start)) = split else {
        return HttpResponse {
            status: None,
            headers: BTreeMap::new(),
            payload: block,
        };
    };

    let head = String::from_utf8_lossy(&block[..head_end]);
    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok());

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            headers
                .entry(key)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }

    HttpResponse {
        status,
        headers,
        payload: &block[body_start..],
    }
}
