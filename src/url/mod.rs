//! URL handling for cc-harvest
//!
//! This module provides the URL identity key, the query-aware key the ledger
//! deduplicates captures by, and a host helper used to tag extracted documents.

mod normalize;

pub use normalize::{capture_key, unify_url_id};

use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use cc_harvest::url::extract_domain;
///
/// let url = Url::parse("https://News.Example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("news.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}
