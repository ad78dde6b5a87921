//! Alerted-set implementations.
//!
//! The pipeline only ever asks "have we alerted on this token inside its
//! TTL" and "remember that we alerted". The in-memory set backs tests and
//! ephemeral runs; the SQLite set survives restarts (WAL, single writer,
//! lazily pruned).

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use tracing::warn;

/// Do-not-re-alert set, read-only during a cycle.
pub trait AlertedSet: Send + Sync {
    fn contains(&self, token_key: &str) -> bool;
    fn add(&self, token_key: &str, ttl: Duration);
}

/// In-memory TTL set.
#[derive(Default)]
pub struct MemoryAlertedSet {
    entries: RwLock<HashMap<String, Instant>>,
}

impl MemoryAlertedSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertedSet for MemoryAlertedSet {
    fn contains(&self, token_key: &str) -> bool {
        let entries = self.entries.read();
        entries
            .get(token_key)
            .map(|expiry| *expiry > Instant::now())
            .unwrap_or(false)
    }

    fn add(&self, token_key: &str, ttl: Duration) {
        self.entries
            .write()
            .insert(token_key.to_string(), Instant::now() + ttl);
    }
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS alerted_tokens (
    token_key   TEXT PRIMARY KEY,
    alerted_at  INTEGER NOT NULL,
    ttl_secs    INTEGER NOT NULL
);
"#;

/// SQLite-backed TTL set. Storage failures degrade to "not alerted" with a
/// warning rather than failing the cycle.
pub struct SqliteAlertedSet {
    conn: Mutex<Connection>,
}

impl SqliteAlertedSet {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open alerted db at {:?}", path.as_ref()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize alerted schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Drop rows whose TTL has lapsed.
    pub fn prune(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM alerted_tokens WHERE alerted_at + ttl_secs <= ?1",
                params![now],
            )
            .context("failed to prune alerted tokens")?;
        Ok(removed)
    }
}

impl AlertedSet for SqliteAlertedSet {
    fn contains(&self, token_key: &str) -> bool {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT 1 FROM alerted_tokens WHERE token_key = ?1 AND alerted_at + ttl_secs > ?2",
            params![token_key, now],
            |_| Ok(()),
        );
        match result {
            Ok(()) => true,
            Err(rusqlite::Error::QueryReturnedNoRows) => false,
            Err(e) => {
                warn!(error = %e, "alerted-set lookup failed, treating as not alerted");
                false
            }
        }
    }

    fn add(&self, token_key: &str, ttl: Duration) {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            "INSERT INTO alerted_tokens (token_key, alerted_at, ttl_secs)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(token_key) DO UPDATE SET alerted_at = ?2, ttl_secs = ?3",
            params![token_key, now, ttl.as_secs() as i64],
        ) {
            warn!(error = %e, token = token_key, "failed to persist alerted token");
        }
    }
}
