//! Human-readable reports
//!
//! This module prints crawl summaries and engine statistics to stdout.

use crate::cache::CacheStats;
use crate::connection::ConnectionStats;
use crate::crawler::SkipReason;
use crate::output::CrawlSummary;
use crate::storage::StoreStats;
use std::collections::HashMap;

/// Counts skipped URLs per reason, most frequent first
pub fn skip_breakdown(summary: &CrawlSummary) -> Vec<(SkipReason, usize)> {
    let mut counts: HashMap<SkipReason, usize> = HashMap::new();
    for skipped in &summary.skipped {
        *counts.entry(skipped.reason).or_default() += 1;
    }

    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
    counts
}

/// Prints a crawl summary
pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Crawl Summary ===\n");

    println!("Overview:");
    println!("  Seed: {}", summary.url);
    println!("  Outcome: {}", summary.outcome);
    println!("  Max depth: {}", summary.crawl_depth);
    println!(
        "  Pages crawled: {} ({} errors)",
        summary.pages_crawled, summary.errors
    );
    println!("  URLs found: {}", summary.pages_found);
    println!(
        "  Duration: {:.2}s ({:.2} pages/sec)",
        summary.duration_ms as f64 / 1000.0,
        summary.pages_per_second
    );
    println!();

    println!("Pages:");
    for page in &summary.results {
        let status = page
            .status_code
            .map(|s| s.to_string())
            .unwrap_or_else(|| "---".to_string());
        let source = if page.from_cache { " (cached)" } else { "" };
        match &page.error {
            None => println!(
                "  [{}] d{} {}{} - {}",
                status,
                page.depth,
                page.url,
                source,
                page.title.as_deref().unwrap_or("(untitled)")
            ),
            Some(error) => println!("  [{}] d{} {} - ERROR: {}", status, page.depth, page.url, error),
        }
    }
    println!();

    let breakdown = skip_breakdown(summary);
    if !breakdown.is_empty() {
        println!("Skipped URLs ({}):", summary.skipped.len());
        for (reason, count) in breakdown {
            println!("  {}: {}", reason, count);
        }
        println!();
    }
}

/// Prints cache counters and tuning advice
pub fn print_cache_stats(stats: &CacheStats, store: Option<&StoreStats>) {
    println!("=== Cache Statistics ===\n");

    println!(
        "  Lookups: {} ({:.1}% hit rate)",
        stats.lookups(),
        stats.hit_rate() * 100.0
    );
    println!(
        "  Hits: {} memory, {} persistent",
        stats.memory_hits, stats.persistent_hits
    );
    println!("  Writes: {}", stats.sets);
    println!(
        "  Removed: {} evicted, {} expired, {} invalidated",
        stats.evictions, stats.expirations, stats.invalidations
    );
    println!(
        "  Memory tier: {} / {} entries",
        stats.memory_entries, stats.memory_capacity
    );
    println!("  Average lookup: {:.1}µs", stats.average_lookup_us);

    if let Some(store) = store {
        println!();
        println!("Persistent tier:");
        println!(
            "  Entries: {} ({} expired)",
            store.entries, store.expired_entries
        );
        println!("  Size: {} bytes", store.total_bytes);
        if let (Some(oldest), Some(newest)) = (store.oldest_entry, store.newest_entry) {
            println!("  Oldest: {}", oldest.to_rfc3339());
            println!("  Newest: {}", newest.to_rfc3339());
        }
    }

    let advice = stats.recommendations();
    if !advice.is_empty() {
        println!();
        println!("Recommendations:");
        for line in advice {
            println!("  - {}", line);
        }
    }
    println!();
}

/// Prints connection manager counters
pub fn print_connection_stats(stats: &ConnectionStats) {
    println!("=== Connection Statistics ===\n");

    println!(
        "  Requests: {} ({} failed)",
        stats.total_requests, stats.failed_requests
    );
    println!("  Peak in flight: {}", stats.peak_active_requests);
    println!("  Reused sockets: {}", stats.reused_sockets);
    println!(
        "  Backpressure: {} delays, {}ms total",
        stats.backpressure_events, stats.total_backpressure_delay_ms
    );
    println!(
        "  Average response time: {:.1}ms",
        stats.average_response_time_ms
    );
    println!();
}
