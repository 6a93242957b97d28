use crate::errors::{AppError, AppResult};
use crate::models::{CacheEntry, ConfigSnapshot, DocumentSummary};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS document_cache (
  id        TEXT PRIMARY KEY,
  content   TEXT NOT NULL,
  cached_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS snapshot_cache (
  key         TEXT PRIMARY KEY,
  payload_json TEXT NOT NULL,
  cached_at   TEXT NOT NULL
);
";

const CONFIG_KEY: &str = "window-config";
const LISTING_KEY: &str = "document-listing";

/// Restart-surviving key/value store for last-known document content, the
/// layout snapshot, and the document listing. Pure storage: no network
/// awareness, last set wins.
#[derive(Debug)]
pub struct DocumentCache {
    conn: Mutex<Connection>,
}

impl DocumentCache {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("cache mutex poisoned".to_string()))
    }

    pub fn get(&self, id: &str) -> AppResult<Option<CacheEntry>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT content, cached_at FROM document_cache WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((content, cached_at)) => Ok(Some(CacheEntry {
                content,
                timestamp: parse_timestamp(&cached_at)?,
            })),
            None => Ok(None),
        }
    }

    pub fn set(&self, id: &str, content: &str, timestamp: DateTime<Utc>) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO document_cache (id, content, cached_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET content = ?2, cached_at = ?3",
            params![id, content, timestamp.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn invalidate(&self, id: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM document_cache WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn clear_all(&self) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM document_cache", [])?;
        conn.execute("DELETE FROM snapshot_cache", [])?;
        Ok(())
    }

    pub fn get_config(&self) -> AppResult<Option<ConfigSnapshot>> {
        self.get_snapshot(CONFIG_KEY)
    }

    pub fn set_config(&self, snapshot: &ConfigSnapshot) -> AppResult<()> {
        self.set_snapshot(CONFIG_KEY, snapshot)
    }

    pub fn invalidate_config(&self) -> AppResult<()> {
        self.invalidate_snapshot(CONFIG_KEY)
    }

    pub fn get_listing(&self) -> AppResult<Option<Vec<DocumentSummary>>> {
        self.get_snapshot(LISTING_KEY)
    }

    pub fn set_listing(&self, listing: &[DocumentSummary]) -> AppResult<()> {
        self.set_snapshot(LISTING_KEY, &listing)
    }

    pub fn invalidate_listing(&self) -> AppResult<()> {
        self.invalidate_snapshot(LISTING_KEY)
    }

    fn get_snapshot<T: serde::de::DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM snapshot_cache WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn set_snapshot<T: serde::Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let payload = serde_json::to_string(value)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO snapshot_cache (key, payload_json, cached_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET payload_json = ?2, cached_at = ?3",
            params![key, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn invalidate_snapshot(&self, key: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM snapshot_cache WHERE key = ?1", [key])?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| AppError::Internal(format!("corrupt cache timestamp {raw:?}: {err}")))
}
