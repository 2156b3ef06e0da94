//! `StateStore` over a single-table SQLite database. Open/WAL/migration
//! sequence narrowed down to one `kv` table: this crate persists only
//! position peaks and the last discovery timestamp, not a full trade
//! history.

use crate::ports::StateStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| format!("failed to create state store directory: {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).with_context(|| format!("failed to open state store database: {}", path))?;
        let store = SqliteStateStore { conn: Mutex::new(conn) };
        store.run_migrations()?;
        store.enable_wal()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory state store")?;
        let store = SqliteStateStore { conn: Mutex::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .context("failed to create kv table")?;
        Ok(())
    }

    fn enable_wal(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.pragma_update(None, "journal_mode", "WAL").context("failed to enable WAL mode")?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn save(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let serialized = serde_json::to_string(&value).context("failed to serialize state value")?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, serialized],
        )
        .context("failed to upsert state value")?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1").context("failed to prepare state load query")?;
        let mut rows = stmt.query(rusqlite::params![key]).context("failed to query state value")?;
        match rows.next().context("failed to step state value row")? {
            Some(row) => {
                let raw: String = row.get(0).context("failed to read state value column")?;
                let parsed = serde_json::from_str(&raw).context("failed to parse stored state value")?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }
}
