//! Download module for WARC records located by the index
//!
//! # Components
//!
//! - `Downloader`: range fetch + WARC unwrap + payload decoding
//! - `PipeMetadata`: per-record metadata handed to routers, extractors and streamers
//! - Digest helpers for `WARC-Payload-Digest` verification

mod digest;
mod downloader;
mod metadata;
mod archive;

pub use digest::{base32_encode, payload_digest, verify_payload_digest};
pub use downloader::{resolve_encoding, Downloader};
pub use metadata::PipeMetadata;
pub use archive::{decompress, read_records, split_http_response, HttpResponse, WarcEntry};
