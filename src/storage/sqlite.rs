//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the PersistentStore trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    IndexRecord, PersistentStore, StorageError, StorageResult, StoreStats, StoredEntry,
};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a cache database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates a database that lives only as long as this store
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// JSON columns of a row: tags, dependencies, events
type LinkColumns = (String, String, String);

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<(StoredEntry, LinkColumns)> {
    Ok((
        StoredEntry {
            key: row.get(0)?,
            value: row.get(1)?,
            expires_at: from_millis(row.get(2)?),
            created_at: from_millis(row.get(3)?),
            tags: Vec::new(),
            dependencies: Vec::new(),
            events: Vec::new(),
        },
        (row.get(4)?, row.get(5)?, row.get(6)?),
    ))
}

fn decode_list(json: &str) -> StorageResult<Vec<String>> {
    serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn encode_list(list: &[String]) -> StorageResult<String> {
    serde_json::to_string(list).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Deletes rows matching `filter` and returns their keys
fn delete_where(conn: &mut Connection, filter: &str, bound: i64) -> StorageResult<Vec<String>> {
    let tx = conn.transaction()?;
    let keys = {
        let mut stmt = tx.prepare(&format!("SELECT key FROM cache_entries WHERE {}", filter))?;
        let keys = stmt
            .query_map(params![bound], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        keys
    };
    tx.execute(
        &format!("DELETE FROM cache_entries WHERE {}", filter),
        params![bound],
    )?;
    tx.commit()?;
    Ok(keys)
}

impl PersistentStore for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<StoredEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT key, value, expires_at, created_at, tags, dependencies, events
                 FROM cache_entries WHERE key = ?1",
                params![key],
                row_to_entry,
            )
            .optional()?;

        match row {
            Some((mut entry, (tags, dependencies, events))) => {
                entry.tags = decode_list(&tags)?;
                entry.dependencies = decode_list(&dependencies)?;
                entry.events = decode_list(&events)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn put(&self, entry: &StoredEntry) -> StorageResult<()> {
        let tags = encode_list(&entry.tags)?;
        let dependencies = encode_list(&entry.dependencies)?;
        let events = encode_list(&entry.events)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cache_entries (key, value, expires_at, created_at, tags, dependencies, events)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at,
                tags = excluded.tags,
                dependencies = excluded.dependencies,
                events = excluded.events",
            params![
                entry.key,
                entry.value,
                to_millis(entry.expires_at),
                to_millis(entry.created_at),
                tags,
                dependencies,
                events
            ],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(changed > 0)
    }

    fn delete_many(&self, keys: &[String]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM cache_entries WHERE key = ?1")?;
            for key in keys {
                removed += stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM cache_entries")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn index_records(&self, now: DateTime<Utc>) -> StorageResult<Vec<IndexRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, tags, dependencies, events FROM cache_entries
             WHERE expires_at > ?1 AND (tags != '[]' OR dependencies != '[]' OR events != '[]')",
        )?;
        let rows = stmt
            .query_map(params![to_millis(now)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(key, tags, dependencies, events)| {
                Ok(IndexRecord {
                    key,
                    tags: decode_list(&tags)?,
                    dependencies: decode_list(&dependencies)?,
                    events: decode_list(&events)?,
                })
            })
            .collect()
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let mut conn = self.conn()?;
        delete_where(&mut conn, "expires_at <= ?1", to_millis(now))
    }

    fn delete_created_before(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let mut conn = self.conn()?;
        delete_where(&mut conn, "created_at < ?1", to_millis(cutoff))
    }

    fn clear(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    fn stats(&self) -> StorageResult<StoreStats> {
        let conn = self.conn()?;
        let now = to_millis(Utc::now());

        let (entries, total_bytes, oldest, newest): (i64, i64, Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(value)), 0), MIN(created_at), MAX(created_at)
                 FROM cache_entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let expired: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at <= ?1",
            params![now],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            entries: entries as u64,
            expired_entries: expired as u64,
            total_bytes: total_bytes as u64,
            oldest_entry: oldest.map(from_millis),
            newest_entry: newest.map(from_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn entry(key: &str, ttl_secs: i64, tags: &[&str]) -> StoredEntry {
        let now = Utc::now();
        StoredEntry {
            key: key.to_string(),
            value: key.as_bytes().to_vec(),
            expires_at: now + Duration::seconds(ttl_secs),
            created_at: now,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            dependencies: Vec::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn test_put_and_get() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(&entry("k1", 60, &["host:a.test"])).unwrap();

        let loaded = store.get("k1").unwrap().unwrap();
        assert_eq!(loaded.value, b"k1".to_vec());
        assert_eq!(loaded.tags, vec!["host:a.test".to_string()]);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_existing() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(&entry("k1", 60, &[])).unwrap();

        let mut replacement = entry("k1", 60, &["new"]);
        replacement.value = b"v2".to_vec();
        store.put(&replacement).unwrap();

        let loaded = store.get("k1").unwrap().unwrap();
        assert_eq!(loaded.value, b"v2".to_vec());
        assert_eq!(store.stats().unwrap().entries, 1);
    }

    #[test]
    fn test_delete_many() {
        let store = SqliteStore::in_memory().unwrap();
        for key in ["a", "b", "c"] {
            store.put(&entry(key, 60, &[])).unwrap();
        }
        let removed = store
            .delete_many(&["a".to_string(), "c".to_string(), "zzz".to_string()])
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_purge_expired() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(&entry("live", 60, &[])).unwrap();
        store.put(&entry("dead", -1, &[])).unwrap();

        assert_eq!(store.stats().unwrap().expired_entries, 1);
        let purged = store.purge_expired(Utc::now()).unwrap();
        assert_eq!(purged, vec!["dead".to_string()]);
        assert!(store.get("live").unwrap().is_some());
    }

    #[test]
    fn test_delete_created_before() {
        let store = SqliteStore::in_memory().unwrap();
        let mut old = entry("old", 3600, &[]);
        old.created_at = Utc::now() - Duration::hours(2);
        store.put(&old).unwrap();
        store.put(&entry("new", 3600, &[])).unwrap();

        let removed = store
            .delete_created_before(Utc::now() - Duration::hours(1))
            .unwrap();
        assert_eq!(removed, vec!["old".to_string()]);
    }

    #[test]
    fn test_links_round_trip_and_feed_the_index_listing() {
        let store = SqliteStore::in_memory().unwrap();
        let mut derived = entry("derived", 60, &["host:a.test"]);
        derived.dependencies = vec!["base".to_string()];
        derived.events = vec!["deploy".to_string()];
        store.put(&derived).unwrap();
        store.put(&entry("plain", 60, &[])).unwrap();
        store.put(&entry("stale", -1, &["host:a.test"])).unwrap();

        let loaded = store.get("derived").unwrap().unwrap();
        assert_eq!(loaded.dependencies, vec!["base".to_string()]);
        assert_eq!(loaded.events, vec!["deploy".to_string()]);

        let records = store.index_records(Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "derived");
        assert_eq!(records[0].tags, vec!["host:a.test".to_string()]);
    }

    #[test]
    fn test_corrupt_link_column_is_a_serialization_error() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(&entry("k1", 60, &[])).unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE cache_entries SET events = 'not json' WHERE key = 'k1'", [])
            .unwrap();

        assert!(matches!(store.get("k1"), Err(StorageError::Serialization(_))));
        assert!(matches!(
            store.index_records(Utc::now()),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.put(&entry("persisted", 60, &[])).unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        assert!(reopened.get("persisted").unwrap().is_some());
    }
}
