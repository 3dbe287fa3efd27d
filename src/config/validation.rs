use crate::config::types::{
    CacheConfig, Config, ConnectionConfig, CrawlOptions, RateLimitConfig, RetryConfig,
    SecurityConfig, UserAgentConfig,
};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Depth bounds accepted for a crawl session
pub const DEPTH_RANGE: (u32, u32) = (1, 5);

/// Page-count bounds accepted for a crawl session
pub const PAGES_RANGE: (u32, u32) = (1, 1000);

/// Concurrency bounds accepted for a crawl session
pub const CONCURRENCY_RANGE: (u32, u32) = (1, 20);

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_options(&CrawlOptions::from(&config.crawl))?;
    validate_user_agent_config(&config.user_agent)?;
    validate_security_config(&config.security)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_connection_config(&config.connections)?;
    validate_cache_config(&config.cache)?;
    validate_retry_config(&config.retry)?;
    Ok(())
}

/// Validates the options of a single crawl session
///
/// Out-of-range values are rejected here rather than deep in the pipeline.
pub fn validate_options(options: &CrawlOptions) -> Result<(), ConfigError> {
    check_range("max_depth", options.max_depth, DEPTH_RANGE)?;
    check_range("max_pages", options.max_pages, PAGES_RANGE)?;
    check_range("concurrency", options.concurrency, CONCURRENCY_RANGE)?;

    if options.session_timeout.is_zero() {
        return Err(ConfigError::Validation(
            "session_timeout must be greater than zero".to_string(),
        ));
    }

    for pattern in options
        .include_patterns
        .iter()
        .chain(options.exclude_patterns.iter())
    {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("'{}' is not a valid regex: {}", pattern, e))
        })?;
    }

    Ok(())
}

impl CrawlOptions {
    /// Checks the session bounds and compiles every pattern once
    pub fn validate(&self) -> crate::Result<()> {
        validate_options(self).map_err(|e| crate::SluiceError::InvalidOptions(e.to_string()))
    }
}

fn check_range(name: &str, value: u32, (min, max): (u32, u32)) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Validation(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if let Some(contact_url) = &config.contact_url {
        Url::parse(contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    }

    if let Some(email) = &config.contact_email {
        validate_email(email)?;
    }

    Ok(())
}

fn validate_security_config(config: &SecurityConfig) -> Result<(), ConfigError> {
    if config.allowed_protocols.is_empty() {
        return Err(ConfigError::Validation(
            "allowed_protocols cannot be empty".to_string(),
        ));
    }

    for protocol in &config.allowed_protocols {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::Validation(format!(
                "Unsupported protocol '{}': only http and https can be fetched",
                protocol
            )));
        }
    }

    if config.max_url_length < 16 {
        return Err(ConfigError::Validation(format!(
            "max_url_length must be >= 16, got {}",
            config.max_url_length
        )));
    }

    if config.max_redirects > 20 {
        return Err(ConfigError::Validation(format!(
            "max_redirects must be <= 20, got {}",
            config.max_redirects
        )));
    }

    if config.dns_cache_size == 0 {
        return Err(ConfigError::Validation(
            "dns_cache_size must be >= 1".to_string(),
        ));
    }

    for pattern in &config.blocked_hostnames {
        if pattern.is_empty() {
            return Err(ConfigError::InvalidPattern(
                "Blocked hostname pattern cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.requests_per_window < 1 {
        return Err(ConfigError::Validation(format!(
            "requests_per_window must be >= 1, got {}",
            config.requests_per_window
        )));
    }

    if config.window_ms < 1 {
        return Err(ConfigError::Validation(
            "window_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_connection_config(config: &ConnectionConfig) -> Result<(), ConfigError> {
    if config.max_sockets < 1 || config.max_sockets > 10_000 {
        return Err(ConfigError::Validation(format!(
            "max_sockets must be between 1 and 10000, got {}",
            config.max_sockets
        )));
    }

    if config.max_free_sockets > config.max_sockets {
        return Err(ConfigError::Validation(format!(
            "max_free_sockets ({}) cannot exceed max_sockets ({})",
            config.max_free_sockets, config.max_sockets
        )));
    }

    if !(config.backpressure_threshold > 0.0 && config.backpressure_threshold <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "backpressure_threshold must be in (0, 1], got {}",
            config.backpressure_threshold
        )));
    }

    if config.backpressure_base_delay_ms > config.backpressure_max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "backpressure_base_delay_ms ({}) cannot exceed backpressure_max_delay_ms ({})",
            config.backpressure_base_delay_ms, config.backpressure_max_delay_ms
        )));
    }

    if config.request_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "request_timeout_ms must be >= 100ms, got {}ms",
            config.request_timeout_ms
        )));
    }

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.memory_capacity < 1 {
        return Err(ConfigError::Validation(
            "memory_capacity must be >= 1".to_string(),
        ));
    }

    if config.default_ttl_ms < 1 {
        return Err(ConfigError::Validation(
            "default_ttl_ms must be >= 1".to_string(),
        ));
    }

    if let Some(path) = &config.database_path {
        if path.is_empty() {
            return Err(ConfigError::Validation(
                "database_path cannot be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
