use crate::UrlError;
use url::Url;

/// Builds a stable identity key for a captured URL
///
/// Two captures of the same article usually differ only in scheme, a `www.`
/// prefix, a trailing slash or a file extension, so the key drops all of them.
///
/// # Normalization Steps
///
/// 1. Parse the URL; a bare `host/path` without scheme is read as `https://`
/// 2. Lowercase the host and remove a `www.` prefix
/// 3. Remove dot segments and empty segments from the path
/// 4. Strip the extension of the last path segment (`foo.html` -> `foo`)
/// 5. Drop scheme, port, query and fragment
///
/// # Examples
///
/// ```
/// use cc_harvest::url::unify_url_id;
///
/// let key = unify_url_id("https://www.example.com/foo.html").unwrap();
/// assert_eq!(key, "example.com/foo");
/// ```
pub fn unify_url_id(url_str: &str) -> Result<String, UrlError> {
    let url = parse_lenient(url_str)?;

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut segments = normalize_segments(url.path());
    if let Some(last) = segments.last_mut() {
        *last = strip_extension(last);
    }
    segments.retain(|s| !s.is_empty());

    if segments.is_empty() {
        Ok(host.to_string())
    } else {
        Ok(format!("{}/{}", host, segments.join("/")))
    }
}

/// Builds the key under which a streamed capture is remembered
///
/// Extends [`unify_url_id`] with the query string, pairs sorted by name, so
/// `article.php?id=1` and `article.php?id=2` stay distinct while
/// `?b=2&a=1` and `?a=1&b=2` collapse. Fragments are still ignored.
///
/// # Examples
///
/// ```
/// use cc_harvest::url::capture_key;
///
/// let key = capture_key("https://www.example.com/article.php?id=1").unwrap();
/// assert_eq!(key, "example.com/article?id=1");
/// ```
pub fn capture_key(url_str: &str) -> Result<String, UrlError> {
    let identity = unify_url_id(url_str)?;
    let parsed = parse_lenient(url_str)?;

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        return Ok(identity);
    }
    pairs.sort();

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    Ok(format!("{}?{}", identity, query))
}

fn parse_lenient(url_str: &str) -> Result<Url, UrlError> {
    let parsed = match Url::parse(url_str) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", url_str))
            .map_err(|e| UrlError::Parse(e.to_string()))?,
        Err(e) => return Err(UrlError::Parse(e.to_string())),
    };

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(UrlError::InvalidScheme(parsed.scheme().to_string()));
    }
    Ok(parsed)
}

/// Splits a path into segments, resolving `.` and `..`
fn normalize_segments(path: &str) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                normalized.pop();
            }
            _ => normalized.push(segment.to_string()),
        }
    }
    normalized
}

fn strip_extension(segment: &str) -> String {
    match segment.rfind('.') {
        Some(idx) if idx > 0 => segment[..idx].to_string(),
        _ => segment.to_string(),
    }
}
