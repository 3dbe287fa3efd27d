//! Storage traits and error types
//!
//! This module defines the trait interface for the persistent cache tier and
//! its error type.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One row of the persistent tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    /// Keys this entry was derived from
    pub dependencies: Vec<String>,
    pub events: Vec<String>,
}

impl StoredEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Invalidation links of one live entry, without its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: String,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    pub events: Vec<String>,
}

/// Persistent tier statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: u64,
    pub expired_entries: u64,
    pub total_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Trait for persistent cache backends
///
/// Implementations synchronize internally; every method takes `&self` so one
/// store can be shared across tasks.
pub trait PersistentStore: Send + Sync {
    /// Gets an entry by key, expired or not
    fn get(&self, key: &str) -> StorageResult<Option<StoredEntry>>;

    /// Inserts or replaces an entry
    fn put(&self, entry: &StoredEntry) -> StorageResult<()>;

    /// Deletes an entry, returning true if it existed
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Deletes several entries in one transaction, returning how many existed
    fn delete_many(&self, keys: &[String]) -> StorageResult<usize>;

    /// Lists every stored key
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Invalidation links of every entry still live at `now`
    fn index_records(&self, now: DateTime<Utc>) -> StorageResult<Vec<IndexRecord>>;

    /// Deletes entries whose TTL has passed, returning their keys
    fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>>;

    /// Deletes entries created before `cutoff`, returning their keys
    fn delete_created_before(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<String>>;

    /// Deletes every entry
    fn clear(&self) -> StorageResult<()>;

    fn stats(&self) -> StorageResult<StoreStats>;
}
