//! Two-tier response cache
//!
//! The memory tier is an LRU with a mandatory TTL per entry; the persistent
//! tier is a [`PersistentStore`] (SQLite by default). Reads check memory, then
//! the store, and promote store hits back into memory. Writes go to both.
//! Entries are removed by TTL (lazily on read and by periodic sweeps), by LRU
//! pressure (memory only), or by tag, dependency, event, pattern and age
//! invalidation. Removing an entry always removes its transitive dependents.

mod index;
mod key;
mod memory;
mod stats;

pub use index::InvalidationIndex;
pub use key::CacheKey;
pub use stats::CacheStats;

use crate::config::CacheConfig;
use crate::storage::{open_store, PersistentStore, StorageError, StoredEntry};
use chrono::{DateTime, Utc};
use memory::{MemoryEntry, MemoryTier};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stats::CacheCounters;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Errors raised by the cache layer
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Persistent tier error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to encode cache value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid invalidation pattern: {0}")]
    InvalidPattern(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Options for one cache write
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Lifetime of the entry; the layer default when unset
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    /// Keys this entry is derived from; invalidating one removes this entry
    pub dependencies: Vec<CacheKey>,
    pub events: Vec<String>,
}

impl SetOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn depends_on(mut self, key: CacheKey) -> Self {
        self.dependencies.push(key);
        self
    }

    pub fn on_event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }
}

struct Inner {
    memory: MemoryTier,
    index: InvalidationIndex,
}

/// Memory + persistent cache shared by every session
pub struct CacheLayer {
    inner: Mutex<Inner>,
    store: Arc<dyn PersistentStore>,
    default_ttl: Duration,
    counters: CacheCounters,
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl CacheLayer {
    /// Opens the persistent tier named in `config` (in-memory when unset)
    pub fn new(config: &CacheConfig) -> CacheResult<Self> {
        let store = open_store(config.database_path.as_deref().map(Path::new))?;
        Self::with_store(config, Arc::new(store))
    }

    /// Builds a layer over an existing persistent tier
    ///
    /// The invalidation index is rebuilt from the live entries already in the
    /// store, so tag, dependency and event invalidation reach them too.
    pub fn with_store(config: &CacheConfig, store: Arc<dyn PersistentStore>) -> CacheResult<Self> {
        let mut index = InvalidationIndex::new();
        for record in store.index_records(Utc::now())? {
            index.register(&record.key, &record.tags, &record.dependencies, &record.events);
        }
        if !index.is_empty() {
            debug!(entries = index.len(), "Rebuilt cache invalidation index");
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                memory: MemoryTier::new(config.memory_capacity),
                index,
            }),
            store,
            default_ttl: config.default_ttl(),
            counters: CacheCounters::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Reads a raw value
    ///
    /// Expired entries are removed on sight and reported as misses.
    pub fn get_bytes(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let started = Instant::now();
        let now = Utc::now();
        let mut inner = self.lock();

        let memory_state = inner
            .memory
            .get(key.as_str())
            .map(|entry| (entry.is_expired(now), entry.value.clone()));

        let result = match memory_state {
            Some((false, value)) => {
                CacheCounters::bump(&self.counters.memory_hits, 1);
                Some(value)
            }
            Some((true, _)) => {
                self.expire(&mut inner, key.as_str())?;
                None
            }
            None => match self.store.get(key.as_str())? {
                Some(stored) if stored.is_expired(now) => {
                    self.expire(&mut inner, key.as_str())?;
                    None
                }
                Some(stored) => {
                    CacheCounters::bump(&self.counters.persistent_hits, 1);
                    trace!(key = %key, "Promoting persistent entry");
                    if !inner.index.contains(key.as_str()) {
                        inner.index.register(
                            key.as_str(),
                            &stored.tags,
                            &stored.dependencies,
                            &stored.events,
                        );
                    }
                    let value = stored.value.clone();
                    self.insert_memory(
                        &mut inner,
                        stored.key,
                        MemoryEntry {
                            value: stored.value,
                            expires_at: stored.expires_at,
                            created_at: stored.created_at,
                        },
                    );
                    Some(value)
                }
                None => None,
            },
        };
        drop(inner);

        if result.is_some() {
            CacheCounters::bump(&self.counters.hits, 1);
        } else {
            CacheCounters::bump(&self.counters.misses, 1);
        }
        self.counters.record_lookup(started.elapsed());
        Ok(result)
    }

    /// Reads and decodes a value
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<Option<T>> {
        match self.get_bytes(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes a raw value to both tiers
    pub fn set_bytes(&self, key: &CacheKey, value: Vec<u8>, options: SetOptions) -> CacheResult<()> {
        let now = Utc::now();
        let expires_at = expiry(now, options.ttl.unwrap_or(self.default_ttl));
        let dependencies: Vec<String> = options
            .dependencies
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();

        let mut inner = self.lock();
        self.store.put(&StoredEntry {
            key: key.as_str().to_string(),
            value: value.clone(),
            expires_at,
            created_at: now,
            tags: options.tags.clone(),
            dependencies: dependencies.clone(),
            events: options.events.clone(),
        })?;
        inner
            .index
            .register(key.as_str(), &options.tags, &dependencies, &options.events);
        self.insert_memory(
            &mut inner,
            key.as_str().to_string(),
            MemoryEntry {
                value,
                expires_at,
                created_at: now,
            },
        );
        drop(inner);

        CacheCounters::bump(&self.counters.sets, 1);
        trace!(key = %key, "Cache write");
        Ok(())
    }

    /// Encodes and writes a value
    pub fn set<T: Serialize>(&self, key: &CacheKey, value: &T, options: SetOptions) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set_bytes(key, bytes, options)
    }

    fn insert_memory(&self, inner: &mut Inner, key: String, entry: MemoryEntry) {
        if let Some(evicted) = inner.memory.insert(key, entry) {
            CacheCounters::bump(&self.counters.evictions, 1);
            trace!(key = %evicted, "Evicted from memory tier");
        }
    }

    fn expire(&self, inner: &mut Inner, key: &str) -> CacheResult<()> {
        let removed = self.remove_cascade(inner, vec![key.to_string()])?;
        CacheCounters::bump(&self.counters.expirations, removed as u64);
        Ok(())
    }

    /// Removes the roots and their transitive dependents from both tiers
    fn remove_cascade(&self, inner: &mut Inner, roots: Vec<String>) -> CacheResult<usize> {
        let keys = inner.index.cascade(roots);
        for key in &keys {
            inner.memory.remove(key);
            inner.index.unregister(key);
        }
        self.store.delete_many(&keys)?;
        Ok(keys.len())
    }

    fn invalidate_keys(&self, roots: Vec<String>, reason: &str) -> CacheResult<usize> {
        let mut inner = self.lock();
        let removed = self.remove_cascade(&mut inner, roots)?;
        drop(inner);

        CacheCounters::bump(&self.counters.invalidations, removed as u64);
        debug!(reason, removed, "Cache invalidation");
        Ok(removed)
    }

    /// Removes one key and everything depending on it
    pub fn invalidate(&self, key: &CacheKey) -> CacheResult<usize> {
        self.invalidate_keys(vec![key.as_str().to_string()], "key")
    }

    /// Removes every entry written with `tag`
    pub fn invalidate_tag(&self, tag: &str) -> CacheResult<usize> {
        let roots = self.lock().index.keys_for_tag(tag);
        self.invalidate_keys(roots, "tag")
    }

    /// Removes the dependents of `key`, transitively; `key` itself stays
    pub fn invalidate_dependency(&self, key: &CacheKey) -> CacheResult<usize> {
        let roots = self.lock().index.dependents_of(key.as_str());
        self.invalidate_keys(roots, "dependency")
    }

    /// Removes every entry registered for `event`
    pub fn invalidate_event(&self, event: &str) -> CacheResult<usize> {
        let roots = self.lock().index.keys_for_event(event);
        self.invalidate_keys(roots, "event")
    }

    /// Removes every entry, in either tier, whose key matches `pattern`
    pub fn invalidate_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let regex = Regex::new(pattern).map_err(|e| CacheError::InvalidPattern(e.to_string()))?;

        let mut inner = self.lock();
        let mut roots: Vec<String> = inner
            .memory
            .keys()
            .into_iter()
            .filter(|k| regex.is_match(k))
            .collect();
        for key in self.store.keys()? {
            if regex.is_match(&key) && !roots.contains(&key) {
                roots.push(key);
            }
        }
        let removed = self.remove_cascade(&mut inner, roots)?;
        drop(inner);

        CacheCounters::bump(&self.counters.invalidations, removed as u64);
        debug!(pattern, removed, "Cache invalidation");
        Ok(removed)
    }

    /// Removes every entry written more than `age` ago
    pub fn invalidate_older_than(&self, age: Duration) -> CacheResult<usize> {
        let cutoff = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut inner = self.lock();
        let mut roots = inner.memory.created_before(cutoff);
        for key in self.store.delete_created_before(cutoff)? {
            if !roots.contains(&key) {
                roots.push(key);
            }
        }
        let removed = self.remove_cascade(&mut inner, roots)?;
        drop(inner);

        CacheCounters::bump(&self.counters.invalidations, removed as u64);
        debug!(age_ms = age.as_millis() as u64, removed, "Cache invalidation");
        Ok(removed)
    }

    /// Removes every expired entry from both tiers
    pub fn sweep_expired(&self) -> CacheResult<usize> {
        let now = Utc::now();
        let mut inner = self.lock();

        let mut roots = inner.memory.expired_keys(now);
        for key in self.store.purge_expired(now)? {
            if !roots.contains(&key) {
                roots.push(key);
            }
        }
        let removed = self.remove_cascade(&mut inner, roots)?;
        drop(inner);

        if removed > 0 {
            CacheCounters::bump(&self.counters.expirations, removed as u64);
            debug!(removed, "Swept expired cache entries");
        }
        Ok(removed)
    }

    /// Runs [`CacheLayer::sweep_expired`] every `interval` until cancelled
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_expired() {
                            warn!(error = %e, "Cache sweep failed");
                        }
                    }
                }
            }
        })
    }

    /// Drops every entry from both tiers
    pub fn clear(&self) -> CacheResult<()> {
        let mut inner = self.lock();
        self.store.clear()?;
        inner.memory.clear();
        inner.index.clear();
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let (entries, capacity) = (inner.memory.len(), inner.memory.capacity());
        drop(inner);
        self.counters.snapshot(entries, capacity)
    }

    pub fn recommendations(&self) -> Vec<String> {
        self.stats().recommendations()
    }

    /// The persistent tier, for inspection
    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }
}
