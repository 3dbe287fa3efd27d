//! Crawler module for guarded page fetching and session execution
//!
//! This module contains the core crawling logic, including:
//! - The validated, cached, rate-limited fetch pipeline
//! - HTML parsing and link extraction
//! - Per-origin sliding-window rate limiting
//! - The breadth-first frontier and session dispatch loop

mod engine;
mod fetcher;
mod frontier;
mod parser;
mod rate_limiter;

pub use engine::{CrawlEngine, CrawlEngineBuilder};
pub use fetcher::{FetchError, FetchExecutor, FetchedPage};
pub use frontier::{Frontier, FrontierEntry, SkipReason, VisitedSet};
pub use parser::{HtmlLinkExtractor, LinkExtractor, ParsedPage};
pub use rate_limiter::{OriginStats, RateLimiter, RateLimiterStats};
