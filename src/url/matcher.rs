/// Checks if a hostname matches a block-list pattern
///
/// Three pattern shapes are supported:
/// 1. Exact: `"example.com"` matches only `"example.com"`
/// 2. Suffix: `"*.internal"` matches `"internal"` and any subdomain such as
///    `"metadata.google.internal"`
/// 3. Prefix: `"metadata*"` matches any host starting with `"metadata"`
///
/// Both sides are expected to be lowercase already.
///
/// # Examples
///
/// ```
/// use sluice::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(matches_wildcard("*.local", "printer.local"));
/// assert!(matches_wildcard("metadata*", "metadata.google.internal"));
/// assert!(!matches_wildcard("*.local", "localhost.example.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        !prefix.is_empty() && candidate.starts_with(prefix)
    } else {
        candidate == pattern
    }
}
