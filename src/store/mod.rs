//! SQLite-backed persistent store.
//!
//! Keeps the last schema snapshot per database, so change detection resumes
//! against the previous state after a restart, and the append-only feedback
//! log the semantic mapper learns from. Stored at `~/.schemata/store.db`
//! unless configured otherwise.
//!
//! # Design
//!
//! - Schema objects are stored as JSON, one row per snapshot key
//! - Feedback rows are only ever inserted
//! - Versioned: a version mismatch clears snapshots (feedback is kept)

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::schema::SchemaObject;

/// Current store schema version. Bump this when the snapshot format changes.
const STORE_VERSION: i32 = 1;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to determine store directory")]
    NoStoreDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One raw feedback event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub term: String,
    /// Element path the caller chose, `db.table.column`.
    pub path: String,
    /// Outcome quality in [0, 1]; above 0.5 reinforces, below demotes.
    pub quality: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A stored snapshot of one database.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub captured_at: DateTime<Utc>,
    pub objects: Vec<SchemaObject>,
}

/// SQLite store for snapshots and feedback.
pub struct SchemaStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SchemaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaStore").finish_non_exhaustive()
    }
}

impl SchemaStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    /// Default location: `~/.schemata/store.db`.
    pub fn default_path() -> StoreResult<PathBuf> {
        let base = dirs::home_dir().ok_or(StoreError::NoStoreDir)?;
        Ok(base.join(".schemata").join("store.db"))
    }

    fn init(&self) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                database TEXT PRIMARY KEY,
                captured_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS snapshot_objects (
                database TEXT NOT NULL,
                key TEXT NOT NULL,
                definition TEXT NOT NULL,
                PRIMARY KEY (database, key)
            );

            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                term TEXT NOT NULL,
                path TEXT NOT NULL,
                quality REAL NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_feedback_term ON feedback (term);
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        if stored_version != Some(STORE_VERSION) {
            if stored_version.is_some() {
                conn.execute("DELETE FROM snapshot_objects", [])?;
                conn.execute("DELETE FROM snapshots", [])?;
            }
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
                params![STORE_VERSION.to_string()],
            )?;
        }

        Ok(())
    }

    /// Replace the stored snapshot of `database`.
    pub fn save_snapshot(
        &self,
        database: &str,
        objects: &[SchemaObject],
        captured_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let rows = objects
            .iter()
            .map(|obj| Ok((obj.snapshot_key(), serde_json::to_string(obj)?)))
            .collect::<StoreResult<Vec<_>>>()?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM snapshot_objects WHERE database = ?", params![database])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO snapshot_objects (database, key, definition) VALUES (?, ?, ?)",
            )?;
            for (key, definition) in &rows {
                stmt.execute(params![database, key, definition])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO snapshots (database, captured_at) VALUES (?, ?)",
            params![database, captured_at.timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Load the stored snapshot of `database`, if one was ever saved.
    pub fn load_snapshot(&self, database: &str) -> StoreResult<Option<StoredSnapshot>> {
        let conn = self.conn();
        let captured: Option<i64> = conn
            .query_row(
                "SELECT captured_at FROM snapshots WHERE database = ?",
                params![database],
                |row| row.get(0),
            )
            .optional()?;
        let Some(captured) = captured else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT definition FROM snapshot_objects WHERE database = ? ORDER BY key")?;
        let definitions = stmt
            .query_map(params![database], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let objects = definitions
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<Vec<SchemaObject>, _>>()?;

        Ok(Some(StoredSnapshot {
            captured_at: from_millis(captured),
            objects,
        }))
    }

    /// Append one feedback event.
    pub fn append_feedback(&self, record: &FeedbackRecord) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO feedback (term, path, quality, recorded_at) VALUES (?, ?, ?, ?)",
            params![
                record.term,
                record.path,
                record.quality,
                record.recorded_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Feedback for `term`, oldest first.
    pub fn feedback_for(&self, term: &str) -> StoreResult<Vec<FeedbackRecord>> {
        self.query_feedback(
            "SELECT term, path, quality, recorded_at FROM feedback WHERE term = ?1 ORDER BY id",
            Some(term),
        )
    }

    /// Every feedback event, oldest first.
    pub fn all_feedback(&self) -> StoreResult<Vec<FeedbackRecord>> {
        self.query_feedback(
            "SELECT term, path, quality, recorded_at FROM feedback ORDER BY id",
            None,
        )
    }

    fn query_feedback(&self, sql: &str, term: Option<&str>) -> StoreResult<Vec<FeedbackRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(FeedbackRecord {
                term: row.get(0)?,
                path: row.get(1)?,
                quality: row.get(2)?,
                recorded_at: from_millis(row.get(3)?),
            })
        };
        let records = match term {
            Some(term) => stmt
                .query_map(params![term], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(records)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
