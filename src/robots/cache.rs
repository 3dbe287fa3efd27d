//! Per-origin robots.txt cache
//!
//! Rules are fetched once per origin and kept for 24 hours. Fetches go through
//! the security gate, the rate limiter and the connection manager like any
//! other request. A `Crawl-delay` tightens the origin's rate limit.

use crate::connection::{ConnectionManager, HttpRequest};
use crate::crawler::RateLimiter;
use crate::robots::{RobotsPolicy, RobotsRules};
use crate::security::{SecurityGate, ValidationContext};
use crate::url::origin_key;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use url::Url;

/// Rules fetched for one origin
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub rules: RobotsRules,

    pub fetched_at: DateTime<Utc>,

    /// How long these rules stay fresh
    pub ttl: Duration,
}

impl CachedRobots {
    pub fn new(rules: RobotsRules, ttl: Duration) -> Self {
        Self {
            rules,
            fetched_at: Utc::now(),
            ttl,
        }
    }

    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > self.ttl
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<CachedRobots>>>;

/// [`RobotsPolicy`] that fetches and caches robots.txt per origin
///
/// Each origin has its own slot, so a slow robots.txt never holds up checks
/// against other origins, and concurrent checks against one origin share a
/// single fetch. Stale slots nobody is using are dropped whenever a new
/// origin is added.
pub struct RobotsCache {
    gate: Arc<SecurityGate>,
    rate_limiter: Arc<RateLimiter>,
    connections: Arc<ConnectionManager>,
    agent: String,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RobotsCache {
    /// Rules are refreshed daily
    pub const FRESH_FOR_HOURS: i64 = 24;

    /// Unreadable robots.txt is retried after this long
    pub const RETRY_AFTER_MINUTES: i64 = 5;

    /// # Arguments
    ///
    /// * `agent` - Product token matched against `User-agent` lines
    pub fn new(
        gate: Arc<SecurityGate>,
        rate_limiter: Arc<RateLimiter>,
        connections: Arc<ConnectionManager>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            gate,
            rate_limiter,
            connections,
            agent: agent.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn slot(&self, origin: &str) -> Slot {
        let mut slots = self.lock_slots();
        if !slots.contains_key(origin) {
            let pruned = prune_stale(&mut slots);
            if pruned > 0 {
                debug!(pruned, "Dropped stale robots.txt entries");
            }
        }
        Arc::clone(slots.entry(origin.to_string()).or_default())
    }

    /// Drops stale or empty slots that no check is using, returning how many
    pub fn prune_stale(&self) -> usize {
        prune_stale(&mut self.lock_slots())
    }

    /// Origins with a slot
    pub fn cached_origins(&self) -> usize {
        self.lock_slots().len()
    }

    /// Returns fresh rules for the URL's origin, fetching them if needed
    pub async fn rules_for(&self, url: &Url) -> RobotsRules {
        let origin = origin_key(url);
        let slot = self.slot(&origin);
        let mut cached = slot.lock().await;

        if let Some(entry) = &*cached {
            if !entry.is_stale() {
                return entry.rules.clone();
            }
        }

        let entry = self.fetch(url, &origin).await;
        let rules = entry.rules.clone();
        *cached = Some(entry);
        rules
    }

    async fn fetch(&self, url: &Url, origin: &str) -> CachedRobots {
        let fresh = Duration::hours(Self::FRESH_FOR_HOURS);
        let retry = Duration::minutes(Self::RETRY_AFTER_MINUTES);

        let Ok(robots_url) = url.join("/robots.txt") else {
            return CachedRobots::new(RobotsRules::allow_all(), retry);
        };

        let verdict = self
            .gate
            .validate(robots_url.as_str(), ValidationContext::initial())
            .await;
        if !verdict.allowed {
            return CachedRobots::new(RobotsRules::allow_all(), fresh);
        }

        self.rate_limiter.acquire(origin).await;
        match self.connections.execute(HttpRequest::get(robots_url)).await {
            Ok(response) if response.is_success() => {
                let rules = RobotsRules::from_body(&response.body);
                if let Some(delay) = rules.crawl_delay(&self.agent) {
                    self.rate_limiter.apply_crawl_delay(origin, delay);
                }
                debug!(origin, "Loaded robots.txt");
                CachedRobots::new(rules, fresh)
            }
            Ok(response) if (400..500).contains(&response.status) => {
                debug!(origin, status = response.status, "No robots.txt");
                CachedRobots::new(RobotsRules::allow_all(), fresh)
            }
            Ok(response) => {
                warn!(origin, status = response.status, "robots.txt unavailable");
                CachedRobots::new(RobotsRules::allow_all(), retry)
            }
            Err(e) => {
                warn!(origin, error = %e, "robots.txt fetch failed");
                CachedRobots::new(RobotsRules::allow_all(), retry)
            }
        }
    }
}

fn prune_stale(slots: &mut HashMap<String, Slot>) -> usize {
    let before = slots.len();
    slots.retain(|_, slot| {
        // A slot held elsewhere has a check or fetch in progress
        if Arc::strong_count(slot) > 1 {
            return true;
        }
        match slot.try_lock() {
            Ok(cached) => cached.as_ref().is_some_and(|entry| !entry.is_stale()),
            Err(_) => true,
        }
    });
    before - slots.len()
}

#[async_trait]
impl RobotsPolicy for RobotsCache {
    async fn is_allowed(&self, url: &Url) -> bool {
        let allowed = self.rules_for(url).await.is_allowed(url.as_str(), &self.agent);
        if !allowed {
            debug!(url = %url, "Disallowed by robots.txt");
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, RateLimitConfig, SecurityConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_cache() -> (RobotsCache, Arc<RateLimiter>) {
        let security = SecurityConfig {
            allowed_hosts: vec!["127.0.0.1".to_string()],
            ..SecurityConfig::default()
        };
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
            requests_per_window: 100,
            window_ms: 1000,
        }));
        let cache = RobotsCache::new(
            Arc::new(SecurityGate::new(&security)),
            Arc::clone(&limiter),
            Arc::new(ConnectionManager::new(&ConnectionConfig::default(), "TestBot/1.0").unwrap()),
            "TestBot",
        );
        (cache, limiter)
    }

    #[test]
    fn test_staleness() {
        let mut cached = CachedRobots::new(RobotsRules::allow_all(), Duration::hours(24));
        assert!(!cached.is_stale());

        cached.fetched_at = Utc::now() - Duration::hours(23);
        assert!(!cached.is_stale());

        cached.fetched_at = Utc::now() - Duration::hours(25);
        assert!(cached.is_stale());
        assert!(cached.age().num_hours() >= 24);
    }

    #[tokio::test]
    async fn test_stale_slots_are_dropped_when_origins_are_added() {
        let (cache, _) = create_test_cache();
        let mut held = Vec::new();
        for (origin, age_hours) in [("https://old.test:443", 30), ("https://new.test:443", 1)] {
            let slot = cache.slot(origin);
            let mut entry = CachedRobots::new(RobotsRules::allow_all(), Duration::hours(24));
            entry.fetched_at = Utc::now() - Duration::hours(age_hours);
            *slot.lock().await = Some(entry);
            held.push(slot);
        }
        assert_eq!(cache.cached_origins(), 2);
        held.clear();

        // Adding a third origin sweeps the stale one
        let third = cache.slot("https://third.test:443");
        assert_eq!(cache.cached_origins(), 2);
        assert!(cache.lock_slots().contains_key("https://new.test:443"));

        // A slot in use is kept even though it holds nothing yet
        assert_eq!(cache.prune_stale(), 0);
        drop(third);
        assert_eq!(cache.prune_stale(), 1);
        assert_eq!(cache.cached_origins(), 1);
    }

    #[tokio::test]
    async fn test_disallow_is_enforced_and_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (cache, _) = create_test_cache();
        let base = Url::parse(&server.uri()).unwrap();

        assert!(cache.is_allowed(&base.join("/public").unwrap()).await);
        assert!(!cache.is_allowed(&base.join("/private/x").unwrap()).await);
    }

    #[tokio::test]
    async fn test_missing_robots_allows_everything() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (cache, _) = create_test_cache();
        let url = Url::parse(&format!("{}/anything", server.uri())).unwrap();
        assert!(cache.is_allowed(&url).await);
    }

    #[tokio::test]
    async fn test_crawl_delay_tightens_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 2"))
            .mount(&server)
            .await;

        let (cache, limiter) = create_test_cache();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        cache.is_allowed(&url).await;

        let stats = limiter.stats();
        let origin = stats.origins.get(&origin_key(&url)).unwrap();
        assert_eq!(origin.limit, 1);
        assert_eq!(origin.window, std::time::Duration::from_secs(2));
    }
}
