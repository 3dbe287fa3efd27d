use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;

/// One value held in the memory tier
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub value: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Bounded LRU tier
pub struct MemoryTier {
    entries: LruCache<String, MemoryEntry>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Inserts an entry, returning the key pushed out to make room
    pub fn insert(&mut self, key: String, entry: MemoryEntry) -> Option<String> {
        match self.entries.push(key.clone(), entry) {
            Some((evicted, _)) if evicted != key => Some(evicted),
            _ => None,
        }
    }

    /// Gets an entry and marks it most recently used
    pub fn get(&mut self, key: &str) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MemoryEntry> {
        self.entries.pop(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn created_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.created_at < cutoff)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(ttl_secs: i64) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            value: vec![1],
            expires_at: now + Duration::seconds(ttl_secs),
            created_at: now,
        }
    }

    #[test]
    fn test_insert_reports_lru_eviction() {
        let mut tier = MemoryTier::new(2);
        assert_eq!(tier.insert("a".into(), entry(60)), None);
        assert_eq!(tier.insert("b".into(), entry(60)), None);
        tier.get("a");
        assert_eq!(tier.insert("c".into(), entry(60)), Some("b".to_string()));
        assert!(tier.contains("a"));
    }

    #[test]
    fn test_replacing_a_key_is_not_an_eviction() {
        let mut tier = MemoryTier::new(1);
        tier.insert("a".into(), entry(60));
        assert_eq!(tier.insert("a".into(), entry(60)), None);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_expired_keys() {
        let mut tier = MemoryTier::new(4);
        tier.insert("live".into(), entry(60));
        tier.insert("dead".into(), entry(-1));
        assert_eq!(tier.expired_keys(Utc::now()), vec!["dead".to_string()]);
    }
}
