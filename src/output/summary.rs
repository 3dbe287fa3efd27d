//! Per-page results and the session summary
//!
//! Both are plain values returned by [`CrawlEngine::crawl`](crate::CrawlEngine::crawl)
//! and serializable with serde for downstream processors.

use crate::crawler::SkipReason;
use crate::state::SessionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Result of dispatching one frontier entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult {
    pub url: String,
    pub depth: u32,
    pub discovered_from: Option<String>,
    pub title: Option<String>,

    /// Page body, when the session keeps content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    pub links_count: usize,
    pub content_length: usize,
    pub status_code: Option<u16>,
    pub from_cache: bool,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl PageResult {
    /// A result for a page that could not be fetched
    pub fn failed(url: &str, depth: u32, discovered_from: Option<String>, error: String) -> Self {
        Self {
            url: url.to_string(),
            depth,
            discovered_from,
            title: None,
            content: None,
            links_count: 0,
            content_length: 0,
            status_code: None,
            from_cache: false,
            timestamp: Utc::now(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A discovered URL that was not enqueued
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedUrl {
    pub url: String,
    /// Depth the URL would have had
    pub depth: u32,
    pub discovered_from: Option<String>,
    pub reason: SkipReason,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlOutcome {
    /// The frontier drained
    Completed,
    /// `max_pages` entries were dispatched
    LimitReached,
    Cancelled,
    TimedOut,
}

impl CrawlOutcome {
    /// The outcome matching a terminal session state
    pub fn from_state(state: SessionState) -> Option<Self> {
        match state {
            SessionState::Drained => Some(Self::Completed),
            SessionState::LimitReached => Some(Self::LimitReached),
            SessionState::Cancelled => Some(Self::Cancelled),
            SessionState::TimedOut => Some(Self::TimedOut),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::LimitReached => "limit_reached",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for CrawlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a session produced
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    /// The normalized seed URL
    pub url: String,

    /// The session's `max_depth`
    pub crawl_depth: u32,

    /// Pages fetched successfully
    pub pages_crawled: usize,

    /// Unique URLs discovered, including the seed
    pub pages_found: usize,

    /// Pages that ended with an error
    pub errors: usize,

    pub duration_ms: u64,
    pub pages_per_second: f64,
    pub outcome: CrawlOutcome,
    pub started_at: DateTime<Utc>,
    pub results: Vec<PageResult>,
    pub skipped: Vec<SkippedUrl>,
}

impl CrawlSummary {
    /// Pages dispatched, successful or not
    pub fn pages_dispatched(&self) -> usize {
        self.results.len()
    }

    /// Skipped URLs with the given reason
    pub fn skipped_for(&self, reason: SkipReason) -> impl Iterator<Item = &SkippedUrl> {
        self.skipped.iter().filter(move |s| s.reason == reason)
    }

    pub fn result_for(&self, url: &str) -> Option<&PageResult> {
        self.results.iter().find(|r| r.url == url)
    }
}
