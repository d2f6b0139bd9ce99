//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

use super::traits::{AssetRequest, CachedResponse, CapturedResponse};

/// Summary of one stored generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationInfo {
  pub name: String,
  pub created_at: DateTime<Utc>,
  pub entries: u64,
}

/// Summary of one cached entry, without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
  pub method: String,
  pub url: String,
  pub status: u16,
  pub size: u64,
  pub cached_at: DateTime<Utc>,
}

/// Trait for asset cache storage backends.
///
/// A generation is visible only once [`store_generation`](Self::store_generation)
/// has committed it in full.
pub trait CacheStorage: Send + Sync {
  /// Whether a complete generation with this name exists.
  fn has_generation(&self, name: &str) -> Result<bool>;

  /// All stored generations, oldest first.
  fn generations(&self) -> Result<Vec<GenerationInfo>>;

  /// Atomically replace the named generation with exactly `entries`.
  fn store_generation(&self, name: &str, entries: &[(AssetRequest, CapturedResponse)])
    -> Result<()>;

  /// Delete a generation and every entry in it. Returns `false` if absent.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  /// Look up a request in a generation.
  fn match_request(&self, generation: &str, request: &AssetRequest)
    -> Result<Option<CachedResponse>>;

  /// Add or overwrite a single entry. Returns `false` without writing when
  /// the generation no longer exists.
  fn put(&self, generation: &str, request: &AssetRequest, response: &CapturedResponse)
    -> Result<bool>;

  /// Entries of a generation, ordered by URL.
  fn entries(&self, generation: &str) -> Result<Vec<EntrySummary>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at `path`, creating it if needed.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(Error::storage_io("creating cache directory"))?;
    }

    let conn = Connection::open(path).map_err(Error::storage("opening asset cache"))?;
    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(Error::storage("opening asset cache"))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(Error::poisoned)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(Error::storage("running cache migrations"))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per fully installed generation
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses, keyed by request identity within a generation
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);
"#;

fn encode_headers(response: &CapturedResponse) -> Result<String> {
  serde_json::to_string(&response.headers)
    .map_err(|e| Error::Corrupt(format!("failed to encode headers: {}", e)))
}

impl CacheStorage for SqliteStorage {
  fn has_generation(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM generations WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(Error::storage("looking up generation"))?;

    Ok(found.is_some())
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT g.name, g.created_at, COUNT(e.request_key) FROM generations g
         LEFT JOIN entries e ON e.generation = g.name
         GROUP BY g.name
         ORDER BY g.created_at, g.rowid",
      )
      .map_err(Error::storage("preparing generation listing"))?;

    let rows: Vec<(String, String, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(Error::storage("listing generations"))?
      .collect::<rusqlite::Result<_>>()
      .map_err(Error::storage("listing generations"))?;

    rows
      .into_iter()
      .map(|(name, created_at, entries)| {
        Ok(GenerationInfo {
          name,
          created_at: parse_datetime(&created_at)?,
          entries: entries.unsigned_abs(),
        })
      })
      .collect()
  }

  fn store_generation(
    &self,
    name: &str,
    entries: &[(AssetRequest, CapturedResponse)],
  ) -> Result<()> {
    let mut conn = self.lock()?;

    // Start transaction
    let tx = conn
      .transaction()
      .map_err(Error::storage("starting generation install"))?;

    // Drop any earlier copy so the generation holds exactly `entries`
    tx.execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(Error::storage("clearing generation"))?;

    tx.execute("INSERT INTO generations (name) VALUES (?)", params![name])
      .map_err(Error::storage("creating generation"))?;

    for (request, response) in entries {
      tx.execute(
        "INSERT OR REPLACE INTO entries (generation, request_key, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          name,
          request.cache_key(),
          request.method.as_str(),
          request.url.as_str(),
          response.status,
          encode_headers(response)?,
          response.body,
        ],
      )
      .map_err(Error::storage("storing cache entry"))?;
    }

    tx.commit()
      .map_err(Error::storage("committing generation install"))?;

    Ok(())
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(Error::storage("deleting generation"))?;

    Ok(removed > 0)
  }

  fn match_request(
    &self,
    generation: &str,
    request: &AssetRequest,
  ) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE generation = ? AND request_key = ?",
        params![generation, request.cache_key()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(Error::storage("matching request"))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers).map_err(|e| {
          Error::Corrupt(format!("bad headers cached for {}: {}", request.url, e))
        })?;
        Ok(Some(CachedResponse {
          response: CapturedResponse {
            status,
            headers,
            body,
          },
          generation: generation.to_string(),
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(
    &self,
    generation: &str,
    request: &AssetRequest,
    response: &CapturedResponse,
  ) -> Result<bool> {
    let conn = self.lock()?;

    let written = conn
      .execute(
        "INSERT OR REPLACE INTO entries (generation, request_key, method, url, status, headers, body, cached_at)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now')
         WHERE EXISTS (SELECT 1 FROM generations WHERE name = ?1)",
        params![
          generation,
          request.cache_key(),
          request.method.as_str(),
          request.url.as_str(),
          response.status,
          encode_headers(response)?,
          response.body,
        ],
      )
      .map_err(Error::storage("storing cache entry"))?;

    Ok(written > 0)
  }

  fn entries(&self, generation: &str) -> Result<Vec<EntrySummary>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT method, url, status, length(body), cached_at FROM entries
         WHERE generation = ?
         ORDER BY url",
      )
      .map_err(Error::storage("preparing entry listing"))?;

    let rows: Vec<(String, String, u16, i64, String)> = stmt
      .query_map(params![generation], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(Error::storage("listing entries"))?
      .collect::<rusqlite::Result<_>>()
      .map_err(Error::storage("listing entries"))?;

    rows
      .into_iter()
      .map(|(method, url, status, size, cached_at)| {
        Ok(EntrySummary {
          method,
          url,
          status,
          size: size.unsigned_abs(),
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| Error::Corrupt(format!("failed to parse datetime '{}': {}", s, e)))
}
