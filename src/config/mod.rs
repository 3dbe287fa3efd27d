//! Configuration module for Sluice
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and the validated per-session [`CrawlOptions`].
//!
//! # Example
//!
//! ```no_run
//! use sluice::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("sluice.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawl.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CacheConfig, Config, ConnectionConfig, CrawlConfig, CrawlOptions, RateLimitConfig,
    RetryConfig, SecurityConfig, UserAgentConfig,
};

// Re-export parser and validation functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::{validate, validate_options, CONCURRENCY_RANGE, DEPTH_RANGE, PAGES_RANGE};
