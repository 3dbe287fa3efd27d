//! Breadth-first frontier for one crawl session
//!
//! Entries are kept in one FIFO queue per depth and always popped from the
//! shallowest non-empty level, so dispatch order is strict BFS even when
//! deeper links are discovered before shallower ones finish.

use crate::url::{normalize_parsed, ScopeDecision};
use crate::UrlError;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use url::Url;

/// A URL waiting to be dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// The URL as discovered, fragment removed; this is what gets requested
    pub url: Url,

    /// Normalized form of `url`, used for duplicate detection
    pub key: Url,

    /// Link distance from the seed
    pub depth: u32,

    /// The page this URL was found on (`None` for the seed)
    pub discovered_from: Option<String>,
}

impl FrontierEntry {
    /// Builds an entry for a discovered URL, deriving its dedup key
    pub fn new(mut url: Url, depth: u32, discovered_from: Option<String>) -> Result<Self, UrlError> {
        url.set_fragment(None);
        let key = normalize_parsed(url.clone())?;
        Ok(Self {
            url,
            key,
            depth,
            discovered_from,
        })
    }
}

/// Why a discovered URL was not enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DepthLimit,
    PageLimit,
    AlreadySeen,
    Excluded,
    NotIncluded,
    ExternalDomain,
    RobotsDisallowed,
    InvalidUrl,
}

impl SkipReason {
    /// Maps a rejecting scope decision to its reason
    pub fn from_scope(decision: ScopeDecision) -> Option<Self> {
        match decision {
            ScopeDecision::Allowed => None,
            ScopeDecision::Excluded => Some(Self::Excluded),
            ScopeDecision::NotIncluded => Some(Self::NotIncluded),
            ScopeDecision::External => Some(Self::ExternalDomain),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DepthLimit => "depth_limit",
            Self::PageLimit => "page_limit",
            Self::AlreadySeen => "already_seen",
            Self::Excluded => "excluded",
            Self::NotIncluded => "not_included",
            Self::ExternalDomain => "external_domain",
            Self::RobotsDisallowed => "robots_disallowed",
            Self::InvalidUrl => "invalid_url",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized URLs already dispatched in this session
///
/// Write-once per URL; its size is the number of dispatch attempts.
#[derive(Debug, Default)]
pub struct VisitedSet {
    urls: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a dispatch, returning false if the URL was already dispatched
    pub fn insert(&mut self, url: &Url) -> bool {
        self.urls.insert(url.as_str().to_string())
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.urls.contains(url.as_str())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Per-depth FIFO queues plus the set of URLs ever enqueued
#[derive(Debug, Default)]
pub struct Frontier {
    levels: Vec<VecDeque<FrontierEntry>>,
    enqueued: HashSet<String>,
    queued: usize,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an entry unless its key was ever queued before
    ///
    /// Returns false for duplicates.
    pub fn push(&mut self, entry: FrontierEntry) -> bool {
        if !self.enqueued.insert(entry.key.as_str().to_string()) {
            return false;
        }

        let depth = entry.depth as usize;
        if self.levels.len() <= depth {
            self.levels.resize_with(depth + 1, VecDeque::new);
        }
        self.levels[depth].push_back(entry);
        self.queued += 1;
        true
    }

    /// Removes the oldest entry of the shallowest level
    pub fn pop(&mut self) -> Option<FrontierEntry> {
        let entry = self.levels.iter_mut().find_map(|level| level.pop_front())?;
        self.queued -= 1;
        Some(entry)
    }

    /// Depth of the entry [`Frontier::pop`] would return
    pub fn next_depth(&self) -> Option<u32> {
        self.levels
            .iter()
            .position(|level| !level.is_empty())
            .map(|d| d as u32)
    }

    /// True if a URL with this normalized key was ever queued in this session
    pub fn has_seen(&self, key: &Url) -> bool {
        self.enqueued.contains(key.as_str())
    }

    /// Entries waiting to be dispatched
    pub fn len(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, depth: u32) -> FrontierEntry {
        FrontierEntry::new(
            Url::parse(&format!("https://example.com{}", path)).unwrap(),
            depth,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_pops_shallowest_level_first() {
        let mut frontier = Frontier::new();
        frontier.push(entry("/d2", 2));
        frontier.push(entry("/d1-a", 1));
        frontier.push(entry("/d0", 0));
        frontier.push(entry("/d1-b", 1));

        let order: Vec<String> = std::iter::from_fn(|| frontier.pop())
            .map(|e| e.url.path().to_string())
            .collect();
        assert_eq!(order, vec!["/d0", "/d1-a", "/d1-b", "/d2"]);
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_duplicates_rejected_even_after_pop() {
        let mut frontier = Frontier::new();
        assert!(frontier.push(entry("/a", 0)));
        frontier.pop();
        assert!(!frontier.push(entry("/a", 1)));
        assert!(frontier.has_seen(&entry("/a", 0).key));
        assert_eq!(frontier.len(), 0);
    }

    #[test]
    fn test_entry_keeps_discovered_form_for_fetching() {
        let docs = entry("/docs/?utm_source=x#intro", 1);
        assert_eq!(docs.url.as_str(), "https://example.com/docs/?utm_source=x");
        assert_eq!(docs.key.as_str(), "https://example.com/docs");

        let mut frontier = Frontier::new();
        assert!(frontier.push(docs));
        assert!(!frontier.push(entry("/docs", 1)));
        assert_eq!(frontier.pop().unwrap().url.path(), "/docs/");
    }

    #[test]
    fn test_next_depth() {
        let mut frontier = Frontier::new();
        assert_eq!(frontier.next_depth(), None);
        frontier.push(entry("/b", 3));
        assert_eq!(frontier.next_depth(), Some(3));
        frontier.push(entry("/a", 1));
        assert_eq!(frontier.next_depth(), Some(1));
    }

    #[test]
    fn test_visited_set_is_write_once() {
        let mut visited = VisitedSet::new();
        let url = Url::parse("https://example.com/").unwrap();
        assert!(visited.insert(&url));
        assert!(!visited.insert(&url));
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn test_scope_mapping() {
        assert_eq!(SkipReason::from_scope(ScopeDecision::Allowed), None);
        assert_eq!(
            SkipReason::from_scope(ScopeDecision::External),
            Some(SkipReason::ExternalDomain)
        );
    }
}
