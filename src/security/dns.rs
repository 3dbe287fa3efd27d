//! Hostname resolution for the security gate
//!
//! Lookups go through the [`Resolver`] trait so tests can pin a fixed DNS
//! state. Answers are memoized in a bounded, time-limited [`DnsCache`].

use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Resolves a hostname to the addresses a connection could reach
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system via `tokio::net::lookup_host`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>> {
        let mut ips: Vec<IpAddr> = tokio::net::lookup_host((host, port))
            .await?
            .map(|addr| addr.ip())
            .collect();
        ips.sort();
        ips.dedup();

        if ips.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", host),
            ));
        }
        Ok(ips)
    }
}

/// Resolver with a fixed table of answers
///
/// Unknown hosts fail to resolve. Every call is counted so callers can
/// assert how many lookups actually happened.
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: HashMap<String, Vec<IpAddr>>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an answer for `host`
    pub fn with_host(mut self, host: &str, ips: Vec<IpAddr>) -> Self {
        self.table.insert(host.to_lowercase(), ips);
        self
    }

    /// Number of `resolve` calls made so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> io::Result<Vec<IpAddr>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.table.get(&host.to_lowercase()) {
            Some(ips) if !ips.is_empty() => Ok(ips.clone()),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", host),
            )),
        }
    }
}

struct CachedAnswer {
    ips: Vec<IpAddr>,
    expires_at: Instant,
}

/// Bounded LRU of DNS answers with a fixed TTL
///
/// Only successful lookups are cached; a failed lookup is retried next time.
pub struct DnsCache {
    entries: Mutex<LruCache<String, CachedAnswer>>,
    ttl: Duration,
}

impl DnsCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns the cached answer for `host` if it has not expired
    pub fn get(&self, host: &str) -> Option<Vec<IpAddr>> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(host) {
            Some(answer) if answer.expires_at > Instant::now() => Some(answer.ips.clone()),
            Some(_) => {
                entries.pop(host);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, host: &str, ips: Vec<IpAddr>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                host.to_string(),
                CachedAnswer {
                    ips,
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
