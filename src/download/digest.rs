//! WARC payload digest verification
//!
//! `WARC-Payload-Digest` values look like `sha1:3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ`.
//! SHA-1 digests are base32 encoded; SHA-256 digests are accepted in base32 or hex.

use crate::DownloadError;
use data_encoding::BASE32_NOPAD;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// RFC 4648 base32 without padding
pub fn base32_encode(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes)
}

/// Digest of a payload in the form CommonCrawl writes it
pub fn payload_digest(payload: &[u8]) -> String {
    format!("sha1:{}", base32_encode(&Sha1::digest(payload)))
}

fn matches_encoded(expected: &str, digest: &[u8]) -> bool {
    let expected = expected.trim().trim_end_matches('=');
    let hex_len = digest.len() * 2;
    if expected.len() == hex_len && expected.chars().all(|c| c.is_ascii_hexdigit()) {
        return expected.eq_ignore_ascii_case(&hex::encode(digest));
    }
    expected.eq_ignore_ascii_case(&base32_encode(digest))
}

/// Checks a payload against a declared `algorithm:value` digest
///
/// # Returns
///
/// * `Ok(true)` - The digest was verified
/// * `Ok(false)` - The algorithm is unknown and the payload was not checked
/// * `Err(DownloadError)` - Integrity failure (mismatch or malformed digest)
pub fn verify_payload_digest(declared: &str, payload: &[u8]) -> Result<bool, DownloadError> {
    let Some((algorithm, value)) = declared.split_once(':') else {
        return Err(DownloadError::integrity(format!(
            "malformed payload digest '{}'",
            declared
        )));
    };

    let matched = match algorithm.trim().to_ascii_lowercase().as_str() {
        "sha1" => matches_encoded(value, &Sha1::digest(payload)),
        "sha256" => matches_encoded(value, &Sha256::digest(payload)),
        other => {
            tracing::debug!(algorithm = other, "Skipping digest check for unknown algorithm");
            return Ok(false);
        }
    };

    if matched {
        Ok(true)
    } else {
        Err(DownloadError::integrity(format!(
            "payload digest mismatch: declared {}",
            declared
        )))
    }
}
