use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sluice::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Builds the rate-limiting key for a URL: `scheme://host:port`
///
/// The port is always explicit so `http://a.com` and `http://a.com:80`
/// share one origin.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sluice::url::origin_key;
///
/// let url = Url::parse("https://example.com/a/b").unwrap();
/// assert_eq!(origin_key(&url), "https://example.com:443");
/// ```
pub fn origin_key(url: &Url) -> String {
    let host = extract_domain(url).unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}
