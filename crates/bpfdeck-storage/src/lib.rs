use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::warn;

pub const HISTORY_SCHEMA_VERSION: i64 = 1;
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("store connection poisoned")]
    Poisoned,
}

/// Durable mapping from stream name to its ordered lines.
pub trait StreamStore: Send + Sync {
    /// Stored lines, or an empty sequence when absent or unreadable.
    fn get(&self, stream: &str) -> Vec<String>;

    /// Replaces the stored lines for `stream`.
    fn put(&self, stream: &str, entries: &[String]) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStream {
    pub stream: String,
    pub entry_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed `StreamStore`, scoped to one namespace (normally the API origin).
pub struct HistoryStore {
    conn: Mutex<Connection>,
    namespace: String,
}

impl HistoryStore {
    pub fn open(path: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            namespace: namespace.into(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory(namespace: impl Into<String>) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            namespace: namespace.into(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn()?
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > HISTORY_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: HISTORY_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.conn()?;
            let sql = include_str!("../migrations/0001_stream_history.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    pub fn load(&self, stream: &str) -> Result<Option<Vec<String>>, StorageError> {
        let raw: Option<String> = self
            .conn()?
            .query_row(
                "
                SELECT entries_json
                FROM stream_history
                WHERE namespace = ?1 AND stream = ?2
                ",
                params![self.namespace, stream],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| {
            serde_json::from_str::<Vec<String>>(&json)
                .map_err(|err| StorageError::Serialization(err.to_string()))
        })
        .transpose()
    }

    pub fn store(&self, stream: &str, entries: &[String]) -> Result<(), StorageError> {
        let entries_json = serde_json::to_string(entries)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;

        self.conn()?.execute(
            "
            INSERT INTO stream_history (
                namespace,
                stream,
                entries_json,
                entry_count,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(namespace, stream) DO UPDATE SET
                entries_json=excluded.entries_json,
                entry_count=excluded.entry_count,
                updated_at=excluded.updated_at
            ",
            params![
                self.namespace,
                stream,
                entries_json,
                entries.len() as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub fn streams(&self) -> Result<Vec<StoredStream>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT stream, entry_count, updated_at
            FROM stream_history
            WHERE namespace = ?1
            ORDER BY stream ASC
            ",
        )?;
        let rows = stmt.query_map([&self.namespace], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut streams = Vec::new();
        for row in rows {
            let (stream, entry_count, updated_at) = row?;
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|err| StorageError::Timestamp(err.to_string()))?
                .with_timezone(&Utc);
            streams.push(StoredStream {
                stream,
                entry_count: entry_count.max(0) as usize,
                updated_at,
            });
        }
        Ok(streams)
    }
}

impl StreamStore for HistoryStore {
    fn get(&self, stream: &str) -> Vec<String> {
        match self.load(stream) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(err) => {
                warn!(stream, namespace = %self.namespace, "history_load_error: {err}");
                Vec::new()
            }
        }
    }

    fn put(&self, stream: &str, entries: &[String]) -> Result<(), StorageError> {
        self.store(stream, entries)
    }
}
