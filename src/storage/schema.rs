//! Database schema definitions
//!
//! This module contains the SQL schema for the persistent cache tier.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Cached values keyed by request fingerprint
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    dependencies TEXT NOT NULL DEFAULT '[]',
    events TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
CREATE INDEX IF NOT EXISTS idx_cache_entries_created ON cache_entries(created_at);

-- Schema bookkeeping
CREATE TABLE IF NOT EXISTS schema_meta (
    version INTEGER NOT NULL
);
"#;

/// Current schema version
pub const SCHEMA_VERSION: u32 = 2;

/// Columns added after version 1
const LINK_COLUMNS: &[&str] = &["dependencies", "events"];

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;

    for column in LINK_COLUMNS {
        let present: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('cache_entries') WHERE name = ?1",
            [column],
            |row| row.get(0),
        )?;
        if present == 0 {
            conn.execute_batch(&format!(
                "ALTER TABLE cache_entries ADD COLUMN {} TEXT NOT NULL DEFAULT '[]'",
                column
            ))?;
        }
    }

    let recorded: i64 =
        conn.query_row("SELECT COUNT(*) FROM schema_meta", [], |row| row.get(0))?;
    if recorded == 0 {
        conn.execute(
            "INSERT INTO schema_meta (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
    } else {
        conn.execute("UPDATE schema_meta SET version = ?1", [SCHEMA_VERSION])?;
    }
    Ok(())
}
