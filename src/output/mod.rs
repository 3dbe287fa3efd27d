//! Output module for crawl results and reports
//!
//! This module handles:
//! - Per-page results and the serializable session summary
//! - Printing summaries and engine statistics

pub mod stats;
mod summary;

pub use stats::{print_cache_stats, print_connection_stats, print_summary, skip_breakdown};
pub use summary::{CrawlOutcome, CrawlSummary, PageResult, SkippedUrl};
