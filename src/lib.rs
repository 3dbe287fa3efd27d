//! Sluice: a guarded crawl execution engine
//!
//! This crate explores a site breadth-first from a seed URL while validating every
//! outbound request against SSRF-class targets, throttling per origin, bounding
//! outbound connections with backpressure, and serving repeat fetches from a
//! two-tier cache.

pub mod cache;
pub mod config;
pub mod connection;
pub mod crawler;
pub mod output;
pub mod robots;
pub mod security;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sluice operations
#[derive(Debug, Error)]
pub enum SluiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid seed URL {url}: {reason}")]
    InvalidSeed { url: String, reason: String },

    #[error("Invalid crawl options: {0}")]
    InvalidOptions(String),

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::SessionState,
        to: state::SessionState,
    },

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Connection error: {0}")]
    Connection(#[from] connection::ConnectionError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use cache::{CacheKey, CacheLayer, SetOptions};
pub use config::{Config, CrawlOptions};
pub use connection::ConnectionManager;
pub use crawler::{CrawlEngine, FetchExecutor, RateLimiter};
pub use output::{CrawlOutcome, CrawlSummary, PageResult};
pub use security::{SecurityGate, Severity, ValidationResult, ViolationKind};
pub use state::SessionState;
pub use url::{extract_domain, normalize_url, origin_key};
