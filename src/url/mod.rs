//! URL handling module for Sluice
//!
//! This module provides URL normalization, origin keys, hostname wildcard
//! matching, and the link scope filter applied to discovered links.

mod domain;
mod matcher;
mod normalize;

use crate::config::CrawlOptions;
use crate::ConfigError;
use regex::Regex;
use url::Url;

// Re-export main functions
pub use domain::{extract_domain, origin_key};
pub use matcher::matches_wildcard;
pub use normalize::{normalize_parsed, normalize_url};

/// Outcome of checking a discovered link against the session scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeDecision {
    /// Link may be enqueued
    Allowed,
    /// Link matched an exclude pattern
    Excluded,
    /// Include patterns are set and none matched
    NotIncluded,
    /// Link leaves the seed host and external links are not followed
    External,
}

impl ScopeDecision {
    /// Returns true if the link may be enqueued
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Compiled include/exclude/domain policy for one crawl session
///
/// Checks run in priority order:
/// 1. Exclude patterns (highest priority)
/// 2. Include patterns
/// 3. Same-host policy
#[derive(Debug, Clone)]
pub struct LinkScope {
    seed_host: String,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    follow_external: bool,
}

impl LinkScope {
    /// Compiles the scope for a session rooted at `seed`
    ///
    /// # Arguments
    ///
    /// * `seed` - The normalized seed URL
    /// * `options` - The session options carrying the patterns
    ///
    /// # Returns
    ///
    /// * `Ok(LinkScope)` - Compiled scope
    /// * `Err(ConfigError::InvalidPattern)` - A pattern is not a valid regex
    pub fn new(seed: &Url, options: &CrawlOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            seed_host: extract_domain(seed).unwrap_or_default(),
            include: compile_patterns(&options.include_patterns)?,
            exclude: compile_patterns(&options.exclude_patterns)?,
            follow_external: options.follow_external,
        })
    }

    /// Classifies a normalized link
    pub fn check(&self, url: &Url) -> ScopeDecision {
        let candidate = url.as_str();

        if self.exclude.iter().any(|re| re.is_match(candidate)) {
            return ScopeDecision::Excluded;
        }

        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(candidate)) {
            return ScopeDecision::NotIncluded;
        }

        if !self.follow_external && !self.is_same_host(url) {
            return ScopeDecision::External;
        }

        ScopeDecision::Allowed
    }

    /// Returns true if the URL is on the seed's host
    pub fn is_same_host(&self, url: &Url) -> bool {
        extract_domain(url).as_deref() == Some(self.seed_host.as_str())
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                ConfigError::InvalidPattern(format!("'{}' is not a valid regex: {}", p, e))
            })
        })
        .collect()
}
