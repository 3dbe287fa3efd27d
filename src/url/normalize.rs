use crate::UrlError;
use url::Url;

/// Query keys that carry click or campaign tracking only; `utm_*` is handled by prefix
const TRACKING_KEYS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "_ga", "_hsenc", "_hsmi", "igshid",
    "yclid",
];

/// Canonical form used for visited-set membership and cache keys
///
/// Two URLs that reach the same resource compare equal after this:
///
/// - scheme and host lowercased, default port dropped
/// - dot segments, empty segments and a trailing slash removed (root stays `/`)
/// - fragment removed
/// - tracking parameters removed, the rest sorted by key then value
///
/// Only `http` and `https` are accepted.
///
/// # Examples
///
/// ```
/// use sluice::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/a/./b/?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/a/b");
/// ```
pub fn normalize_url(raw: &str) -> Result<Url, UrlError> {
    let parsed = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_parsed(parsed)
}

/// [`normalize_url`] for a URL that is already parsed, e.g. a resolved link
pub fn normalize_parsed(mut url: Url) -> Result<Url, UrlError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(UrlError::InvalidScheme(format!(
                "expected http or https, got {}",
                other
            )))
        }
    }

    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_ascii_lowercase(),
        _ => return Err(UrlError::MissingDomain),
    };
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("cannot set host {}: {}", host, e)))?;

    if url.port().is_some() && url.port() == known_port(url.scheme()) {
        url.set_port(None)
            .map_err(|_| UrlError::Malformed("cannot clear default port".to_string()))?;
    }

    let path = canonical_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    let query = canonical_query(&url);
    if query.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(query);
    }

    Ok(url)
}

fn known_port(scheme: &str) -> Option<u16> {
    match scheme {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    }
}

/// Resolves `.`/`..`, collapses repeated slashes and drops the trailing slash
fn canonical_path(path: &str) -> String {
    let segments = path.split('/').fold(Vec::new(), |mut kept, segment| {
        match segment {
            "" | "." => {}
            ".." => {
                kept.pop();
            }
            s => kept.push(s),
        }
        kept
    });

    let mut out = String::with_capacity(path.len().max(1));
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Query pairs without tracking keys, in a stable order
fn canonical_query(url: &Url) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_key(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    pairs
}

fn is_tracking_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_KEYS.contains(&lower.as_str())
}
