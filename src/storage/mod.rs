//! Storage module for the persistent cache tier
//!
//! This module handles all database operations for the cache, including:
//! - SQLite database initialization and schema management
//! - Keyed entry persistence with expiry and creation timestamps
//! - Tag, dependency and event links so invalidation survives a restart
//! - Bulk deletion for sweeps and invalidation

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    IndexRecord, PersistentStore, StorageError, StorageResult, StoreStats, StoredEntry,
};

use std::path::Path;

/// Opens the persistent tier at `path`, or an in-memory database when unset
///
/// # Arguments
///
/// * `path` - Optional path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully opened storage
/// * `Err(StorageError)` - Failed to open storage
pub fn open_store(path: Option<&Path>) -> StorageResult<SqliteStore> {
    match path {
        Some(path) => SqliteStore::new(path),
        None => SqliteStore::in_memory(),
    }
}
