use crate::url::normalize_url;
use reqwest::header::HeaderMap;
use sha2::{Digest, Sha256};
use std::fmt;

/// Request headers that change the representation a server returns
const VARY_HEADERS: &[&str] = &["accept", "accept-encoding", "accept-language"];

/// Deterministic cache fingerprint
///
/// Keys built with [`CacheKey::for_request`] are the hex SHA-256 of the
/// normalized URL plus representation-affecting headers, so two spellings of
/// the same request share one entry and the raw URL is never stored as a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprints a GET request
    ///
    /// # Arguments
    ///
    /// * `url` - The request URL; normalized first when it parses
    /// * `headers` - Request headers; only the vary set contributes
    pub fn for_request(url: &str, headers: &HeaderMap) -> Self {
        let normalized = normalize_url(url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string());

        let mut vary: Vec<(String, String)> = headers
            .iter()
            .filter_map(|(name, value)| {
                let name = name.as_str().to_ascii_lowercase();
                if !VARY_HEADERS.contains(&name.as_str()) {
                    return None;
                }
                value.to_str().ok().map(|v| (name, v.trim().to_string()))
            })
            .collect();
        vary.sort();

        let mut hasher = Sha256::new();
        hasher.update(b"GET ");
        hasher.update(normalized.as_bytes());
        for (name, value) in &vary {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprints a URL with no request headers
    pub fn for_url(url: &str) -> Self {
        Self::for_request(url, &HeaderMap::new())
    }

    /// Uses an application-chosen key verbatim
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::raw(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, ACCEPT, USER_AGENT};

    #[test]
    fn test_equivalent_urls_share_a_key() {
        let a = CacheKey::for_url("HTTP://Example.com:80/a/./b/?z=1&a=2#frag");
        let b = CacheKey::for_url("http://example.com/a/b?a=2&z=1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_is_sha256_hex() {
        let key = CacheKey::for_url("https://example.com/");
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!key.as_str().contains("example"));
    }

    #[test]
    fn test_vary_headers_change_the_key() {
        let mut json = HeaderMap::new();
        json.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let plain = CacheKey::for_url("https://example.com/");
        let with_accept = CacheKey::for_request("https://example.com/", &json);
        assert_ne!(plain, with_accept);
    }

    #[test]
    fn test_other_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("SomeBot/2.0"));
        assert_eq!(
            CacheKey::for_request("https://example.com/", &headers),
            CacheKey::for_url("https://example.com/")
        );
    }
}
