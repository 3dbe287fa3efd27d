use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sluice
///
/// Every section is optional in the TOML file; missing sections fall back to
/// their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub crawl: CrawlConfig,
    pub user_agent: UserAgentConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub connections: ConnectionConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
}

/// Default crawl session options
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Maximum link depth from the seed (1-5)
    pub max_depth: u32,

    /// Maximum number of pages dispatched per session (1-1000)
    pub max_pages: u32,

    /// Maximum simultaneous in-flight fetches per session (1-20)
    pub concurrency: u32,

    /// Follow links that leave the seed's host
    pub follow_external: bool,

    /// Consult robots.txt before dispatching a URL
    pub respect_robots: bool,

    /// Keep page bodies in the per-page results
    pub extract_content: bool,

    /// Regexes a discovered URL must match (any) to be enqueued
    pub include_patterns: Vec<String>,

    /// Regexes that reject a discovered URL
    pub exclude_patterns: Vec<String>,

    /// Finish every depth level before dispatching the next
    pub wait_for_level: bool,

    /// Wall-clock budget for one session (milliseconds)
    pub session_timeout_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_pages: 50,
            concurrency: 5,
            follow_external: false,
            respect_robots: true,
            extract_content: true,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            wait_for_level: true,
            session_timeout_ms: 300_000,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: Option<String>,

    /// Email address for crawler-related contact
    pub contact_email: Option<String>,
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    ///
    /// Format: `Name/Version (+ContactURL; ContactEmail)`, with the
    /// parenthesized part omitted when no contact details are configured.
    pub fn user_agent_string(&self) -> String {
        let contact: Vec<String> = [
            self.contact_url.as_ref().map(|u| format!("+{}", u)),
            self.contact_email.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();

        if contact.is_empty() {
            format!("{}/{}", self.crawler_name, self.crawler_version)
        } else {
            format!(
                "{}/{} ({})",
                self.crawler_name,
                self.crawler_version,
                contact.join("; ")
            )
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "Sluice".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
            contact_email: None,
        }
    }
}

/// Security gate configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SecurityConfig {
    /// URL schemes the engine will fetch
    pub allowed_protocols: Vec<String>,

    /// Extra hostnames or wildcard patterns to block, on top of the built-in list
    pub blocked_hostnames: Vec<String>,

    /// Ports that are never contacted (replaces the built-in list when set)
    pub blocked_ports: Option<Vec<u16>>,

    /// Hosts exempt from the hostname and IP block-lists
    pub allowed_hosts: Vec<String>,

    /// Maximum accepted URL length in bytes
    pub max_url_length: usize,

    /// Maximum redirect hops followed per request
    pub max_redirects: u32,

    /// How long a DNS answer is memoized (milliseconds)
    pub dns_cache_ttl_ms: u64,

    /// Maximum number of memoized DNS answers
    pub dns_cache_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_protocols: vec!["http".to_string(), "https".to_string()],
            blocked_hostnames: Vec::new(),
            blocked_ports: None,
            allowed_hosts: Vec::new(),
            max_url_length: 2048,
            max_redirects: 5,
            dns_cache_ttl_ms: 60_000,
            dns_cache_size: 1024,
        }
    }
}

impl SecurityConfig {
    pub fn dns_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.dns_cache_ttl_ms)
    }
}

/// Per-origin politeness configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RateLimitConfig {
    /// Requests allowed per origin in one window
    pub requests_per_window: u32,

    /// Window length (milliseconds)
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 10,
            window_ms: 1000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Outbound connection pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectionConfig {
    /// Maximum in-flight requests per protocol agent
    pub max_sockets: usize,

    /// Idle connections kept warm per host
    pub max_free_sockets: usize,

    /// How long an idle connection stays reusable (milliseconds)
    pub keep_alive_ms: u64,

    /// Per-request timeout (milliseconds)
    pub request_timeout_ms: u64,

    /// TCP connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// Utilization ratio above which admission is delayed
    pub backpressure_threshold: f64,

    /// Minimum interval between utilization recomputations (milliseconds)
    pub backpressure_check_interval_ms: u64,

    /// First admission delay once backpressure is active (milliseconds)
    pub backpressure_base_delay_ms: u64,

    /// Upper bound on a single admission delay (milliseconds)
    pub backpressure_max_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_sockets: 50,
            max_free_sockets: 10,
            keep_alive_ms: 30_000,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            backpressure_threshold: 0.8,
            backpressure_check_interval_ms: 100,
            backpressure_base_delay_ms: 10,
            backpressure_max_delay_ms: 5_000,
        }
    }
}

impl ConnectionConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Two-tier cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Maximum number of entries held in the memory tier
    pub memory_capacity: usize,

    /// TTL applied when a write does not specify one (milliseconds)
    pub default_ttl_ms: u64,

    /// SQLite file for the persistent tier; in-memory database when unset
    pub database_path: Option<String>,

    /// Interval of the background expiry sweep (milliseconds)
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 1000,
            default_ttl_ms: 3_600_000,
            database_path: None,
            sweep_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Retry policy for transient network failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Total attempts per request, including the first
    pub max_attempts: u32,

    /// Backoff before the second attempt (milliseconds); doubles afterwards
    pub base_delay_ms: u64,

    /// Upper bound on a single backoff (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Backoff to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

/// Validated options for a single crawl session
///
/// Built from [`CrawlConfig`] (or by hand) and checked with
/// [`CrawlOptions::validate`] before a session starts.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_depth: u32,
    pub max_pages: u32,
    pub concurrency: u32,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub follow_external: bool,
    pub respect_robots: bool,
    pub extract_content: bool,
    pub wait_for_level: bool,
    pub session_timeout: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self::from(&CrawlConfig::default())
    }
}

impl From<&CrawlConfig> for CrawlOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            concurrency: config.concurrency,
            include_patterns: config.include_patterns.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
            follow_external: config.follow_external,
            respect_robots: config.respect_robots,
            extract_content: config.extract_content,
            wait_for_level: config.wait_for_level,
            session_timeout: Duration::from_millis(config.session_timeout_ms),
        }
    }
}
