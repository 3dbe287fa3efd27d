//! Sluice main entry point
//!
//! This is the command-line interface for the Sluice crawl engine.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use sluice::config::{load_config_with_hash, Config, CrawlOptions};
use sluice::output::{print_cache_stats, print_connection_stats, print_summary};
use sluice::security::ValidationContext;
use sluice::CrawlEngine;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sluice: a guarded crawl execution engine
///
/// Sluice crawls a site breadth-first from a seed URL. Every request is
/// checked against private and metadata address ranges, throttled per
/// origin, and served from cache when a fresh copy exists.
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(version)]
#[command(about = "A guarded crawl execution engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// URL to start crawling from
    #[arg(value_name = "SEED")]
    seed: String,

    /// Override the configured maximum link depth (1-5)
    #[arg(long)]
    max_depth: Option<u32>,

    /// Override the configured page limit (1-1000)
    #[arg(long)]
    max_pages: Option<u32>,

    /// Override the configured worker count (1-20)
    #[arg(long)]
    concurrency: Option<u32>,

    /// Override the configured session timeout, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the summary as JSON instead of a report
    #[arg(long)]
    json: bool,

    /// Validate config and check the seed against the security gate without crawling
    #[arg(long)]
    dry_run: bool,

    /// Print cache and connection statistics after the crawl
    #[arg(long)]
    cache_stats: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded (hash: {})", hash);

    let engine = CrawlEngine::new(config).context("failed to start crawl engine")?;
    let options = session_options(&cli, engine.default_options());

    if cli.dry_run {
        return handle_dry_run(&engine, &cli.seed, &options).await;
    }

    handle_crawl(&engine, &cli, options).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sluice=info,warn"),
            1 => EnvFilter::new("sluice=debug,info"),
            2 => EnvFilter::new("sluice=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Applies command-line overrides to the configured options
fn session_options(cli: &Cli, mut options: CrawlOptions) -> CrawlOptions {
    if let Some(depth) = cli.max_depth {
        options.max_depth = depth;
    }
    if let Some(pages) = cli.max_pages {
        options.max_pages = pages;
    }
    if let Some(concurrency) = cli.concurrency {
        options.concurrency = concurrency;
    }
    if let Some(seconds) = cli.timeout {
        options.session_timeout = Duration::from_secs(seconds);
    }
    options
}

/// Handles --dry-run: shows the effective settings and vets the seed
async fn handle_dry_run(engine: &CrawlEngine, seed: &str, options: &CrawlOptions) -> anyhow::Result<()> {
    let config: &Config = engine.config();
    println!("=== Sluice Dry Run ===\n");

    println!("Session:");
    println!("  Max depth: {}", options.max_depth);
    println!("  Max pages: {}", options.max_pages);
    println!("  Concurrency: {}", options.concurrency);
    println!("  Follow external: {}", options.follow_external);
    println!("  Respect robots.txt: {}", options.respect_robots);
    println!("  Timeout: {}s", options.session_timeout.as_secs());

    println!("\nPoliteness:");
    println!(
        "  {} requests / {}ms per origin",
        config.rate_limit.requests_per_window, config.rate_limit.window_ms
    );
    println!("  Max sockets: {}", config.connections.max_sockets);
    println!("  User agent: {}", config.user_agent.user_agent_string());

    options.validate()?;
    println!("\n✓ Configuration is valid");

    let verdict = engine.gate().validate(seed, ValidationContext::initial()).await;
    if verdict.allowed {
        println!(
            "✓ Seed accepted: {}",
            verdict.sanitized_url.as_deref().unwrap_or(seed)
        );
        Ok(())
    } else {
        println!("✗ Seed rejected: {}", verdict.summary());
        anyhow::bail!("seed {} failed security validation", seed)
    }
}

/// Handles the main crawl operation; Ctrl-C cancels the session
async fn handle_crawl(engine: &CrawlEngine, cli: &Cli, options: CrawlOptions) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let sweeper = engine.start_cache_sweeper(cancel.child_token());

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling crawl");
            interrupt.cancel();
        }
    });

    let result = engine.crawl(&cli.seed, options, cancel.clone()).await;
    cancel.cancel();
    let _ = sweeper.await;

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            return Err(e.into());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !cli.quiet {
        print_summary(&summary);
    }

    if cli.cache_stats {
        let store_stats = engine.cache().store().stats().ok();
        print_cache_stats(&engine.cache().stats(), store_stats.as_ref());
        print_connection_stats(&engine.connections().stats());
    }

    Ok(())
}
