// ABOUTME: SQLite-backed persistence sink storing one row per block diagnostic file.
// ABOUTME: Rows are keyed by the file path the flush protocol derives, with the height indexed for lookups.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use blockdiag_core::model::BlockDiagnosticEntry;
use blockdiag_core::sink::{BlockFileLayout, PersistenceSink, SinkError};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Errors that can occur during SQLite sink operations.
#[derive(Debug, Error)]
pub enum SqliteError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite connection lock poisoned")]
    Poisoned,
}

impl From<SqliteError> for SinkError {
    fn from(e: SqliteError) -> Self {
        SinkError::Backend(e.to_string())
    }
}

/// Stores serialized entries in a `block_diagnostics` table instead of
/// individual files. Each write replaces the whole row for its path.
#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Open or create the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, SqliteError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, SqliteError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SqliteError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS block_diagnostics (
                path TEXT PRIMARY KEY,
                height INTEGER,
                body TEXT NOT NULL,
                written_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS block_diagnostics_height
                ON block_diagnostics (height);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn store(&self, path: &Path, body: &str) -> Result<(), SqliteError> {
        let height = BlockFileLayout::height_from_path(path).map(|h| h as i64);
        let conn = self.conn.lock().map_err(|_| SqliteError::Poisoned)?;
        conn.execute(
            "INSERT INTO block_diagnostics (path, height, body, written_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                height = excluded.height,
                body = excluded.body,
                written_at = excluded.written_at",
            params![
                path.to_string_lossy().into_owned(),
                height,
                body,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load the entry stored under `path`.
    pub fn load(&self, path: &Path) -> Result<Option<BlockDiagnosticEntry>, SqliteError> {
        let conn = self.conn.lock().map_err(|_| SqliteError::Poisoned)?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM block_diagnostics WHERE path = ?1",
                params![path.to_string_lossy().into_owned()],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// All stored heights, ascending.
    pub fn heights(&self) -> Result<Vec<u64>, SqliteError> {
        let conn = self.conn.lock().map_err(|_| SqliteError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT height FROM block_diagnostics WHERE height IS NOT NULL ORDER BY height ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;

        let mut heights = Vec::new();
        for row in rows {
            heights.push(row? as u64);
        }
        Ok(heights)
    }
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    async fn write(&self, path: &Path, bytes: Vec<u8>) -> Result<(), SinkError> {
        let body = String::from_utf8(bytes)
            .map_err(|e| SinkError::Backend(format!("entry is not valid utf-8: {}", e)))?;
        let sink = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || sink.store(&path, &body))
            .await
            .map_err(|e| SinkError::Backend(format!("write task failed: {}", e)))??;
        Ok(())
    }
}
