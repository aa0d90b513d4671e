//! SQLite-backed durable tier
//!
//! Plain local storage has no native TTL, so every row carries its own
//! `expires_at` (unix ms) and reads enforce it. Statements run on the
//! blocking pool; the async side only awaits the join handle.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::tier::{expiry_from, now_ms, CacheTier, TierEntry};
use crate::Error;

/// Writes between housekeeping passes (expired purge + capacity trim)
const MAINTENANCE_INTERVAL: u64 = 256;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        key          TEXT PRIMARY KEY,
        value        TEXT NOT NULL,
        created_at   INTEGER NOT NULL,
        expires_at   INTEGER NOT NULL,
        accessed_at  INTEGER NOT NULL,
        access_count INTEGER DEFAULT 1
    );
    CREATE INDEX IF NOT EXISTS idx_expires ON cache_entries(expires_at);
    CREATE INDEX IF NOT EXISTS idx_accessed ON cache_entries(accessed_at);
"#;

/// SQLite-based durable cache tier
pub struct SqliteTier {
    conn: Arc<Mutex<Connection>>,
    max_entries: Option<usize>,
    writes: AtomicU64,
}

impl SqliteTier {
    /// Open (or create) the cache database at the given path
    pub fn new(path: impl AsRef<Path>, max_entries: Option<usize>) -> crate::Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        // WAL mode + performance pragmas
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=-16000;
             PRAGMA temp_store=MEMORY;",
        )?;

        Ok(Self::from_connection(conn, max_entries))
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn, None))
    }

    fn from_connection(conn: Connection, max_entries: Option<usize>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            max_entries,
            writes: AtomicU64::new(0),
        }
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| Error::Cache(format!("sqlite task failed: {}", e)))?
    }

    fn evict_lru(conn: &Connection, max_entries: usize) -> crate::Result<usize> {
        let current_count: usize =
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;

        if current_count <= max_entries {
            return Ok(0);
        }

        let to_delete = current_count - max_entries;
        conn.execute(
            r#"
            DELETE FROM cache_entries WHERE key IN (
                SELECT key FROM cache_entries
                ORDER BY accessed_at ASC
                LIMIT ?
            )
            "#,
            params![to_delete as i64],
        )?;

        Ok(to_delete)
    }

    fn maintain(conn: &Connection, max_entries: Option<usize>) -> crate::Result<()> {
        let purged = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?",
            params![now_ms()],
        )?;
        let evicted = match max_entries {
            Some(max) => Self::evict_lru(conn, max)?,
            None => 0,
        };
        if purged + evicted > 0 {
            tracing::debug!(purged, evicted, "Durable cache housekeeping");
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTier for SqliteTier {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> crate::Result<Option<TierEntry>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let now = now_ms();
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT value, expires_at FROM cache_entries WHERE key = ?",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((value, expires_at)) if expires_at > now => {
                    conn.execute(
                        "UPDATE cache_entries SET accessed_at = ?, access_count = access_count + 1 WHERE key = ?",
                        params![now, key],
                    )?;
                    Ok(Some(TierEntry {
                        value,
                        expires_at_ms: Some(expires_at),
                    }))
                }
                Some(_) => {
                    conn.execute(
                        "DELETE FROM cache_entries WHERE key = ? AND expires_at <= ?",
                        params![key, now],
                    )?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        let expires_at = expiry_from(ttl);
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        let max_entries = self.max_entries;

        self.with_conn(move |conn| {
            let now = now_ms();
            conn.execute(
                r#"
                INSERT OR REPLACE INTO cache_entries
                (key, value, created_at, expires_at, accessed_at, access_count)
                VALUES (?, ?, ?, ?, ?, 1)
                "#,
                params![key, value, now, expires_at, now],
            )?;

            if writes % MAINTENANCE_INTERVAL == 0 {
                Self::maintain(conn, max_entries)?;
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cache_entries WHERE key = ?", params![key])?;
            Ok(())
        })
        .await
    }
}
