use std::fmt;
use std::path::Path;

use contracts::{OutcomeEvent, SessionConfig, SessionStatus, WorldState};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSessionSummary {
    pub session_id: String,
    pub version: u64,
    pub tick: u64,
    pub updated_at_ms: u64,
}

#[derive(Debug)]
pub enum PersistenceError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    NotAttached,
    SessionAlreadyExists(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::NotAttached => write!(f, "sqlite store is not attached"),
            Self::SessionAlreadyExists(session_id) => {
                write!(f, "session {session_id} already exists")
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// SQLite-backed snapshot and outcome store. Writes happen outside the hot
/// validate/apply path, on the debounced schedule driven by `SessionApi`.
#[derive(Debug)]
pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&self) -> Result<(), PersistenceError> {
        self.conn
            .query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        Ok(())
    }

    fn migrate(&self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                config_json TEXT NOT NULL,
                status_json TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS snapshots (
                session_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                tick INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY (session_id, version)
            );
            CREATE TABLE IF NOT EXISTS outcomes (
                session_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY (session_id, event_id)
            );",
        )?;
        Ok(())
    }

    pub fn session_exists(&self, session_id: &str) -> Result<bool, PersistenceError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT session_id FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete_session(&mut self, session_id: &str) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.execute(
            "DELETE FROM snapshots WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.execute(
            "DELETE FROM outcomes WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Persist the session row, the latest snapshot, and any new outcome
    /// events in a single transaction.
    pub fn persist_delta(
        &mut self,
        config: &SessionConfig,
        status: &SessionStatus,
        snapshot: &WorldState,
        outcomes: &[OutcomeEvent],
        now_ms: u64,
    ) -> Result<(), PersistenceError> {
        let config_json = serde_json::to_string(config)?;
        let status_json = serde_json::to_string(status)?;
        let snapshot_json = serde_json::to_string(snapshot)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO sessions (session_id, config_json, status_json, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                 config_json = excluded.config_json,
                 status_json = excluded.status_json,
                 updated_at_ms = excluded.updated_at_ms",
            params![
                config.session_id.as_str(),
                config_json,
                status_json,
                i64::try_from(now_ms).unwrap_or(i64::MAX),
            ],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO snapshots (
                session_id, version, tick, payload_json, created_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                config.session_id.as_str(),
                i64::try_from(snapshot.version).unwrap_or(i64::MAX),
                i64::try_from(snapshot.tick).unwrap_or(i64::MAX),
                snapshot_json,
                i64::try_from(now_ms).unwrap_or(i64::MAX),
            ],
        )?;
        for outcome in outcomes {
            let payload_json = serde_json::to_string(outcome)?;
            tx.execute(
                "INSERT OR IGNORE INTO outcomes (
                    session_id, event_id, version, kind, payload_json, created_at_ms
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    config.session_id.as_str(),
                    outcome.event_id.as_str(),
                    i64::try_from(outcome.version).unwrap_or(i64::MAX),
                    outcome.kind.as_str(),
                    payload_json,
                    i64::try_from(now_ms).unwrap_or(i64::MAX),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Latest persisted world for the session, if any.
    pub fn load_latest_snapshot(
        &self,
        session_id: &str,
    ) -> Result<Option<WorldState>, PersistenceError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM snapshots
                 WHERE session_id = ?1
                 ORDER BY version DESC
                 LIMIT 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Outcome events with a version strictly greater than `since_version`,
    /// in version order, for clients reconciling a gap.
    pub fn load_outcomes_since(
        &self,
        session_id: &str,
        since_version: u64,
    ) -> Result<Vec<OutcomeEvent>, PersistenceError> {
        let mut statement = self.conn.prepare(
            "SELECT payload_json FROM outcomes
             WHERE session_id = ?1 AND version > ?2
             ORDER BY version ASC",
        )?;
        let rows = statement.query_map(
            params![
                session_id,
                i64::try_from(since_version).unwrap_or(i64::MAX)
            ],
            |row| row.get::<_, String>(0),
        )?;
        let mut outcomes = Vec::new();
        for raw in rows {
            outcomes.push(serde_json::from_str(&raw?)?);
        }
        Ok(outcomes)
    }

    pub fn list_sessions(&self) -> Result<Vec<PersistedSessionSummary>, PersistenceError> {
        let mut statement = self.conn.prepare(
            "SELECT session_id, status_json, updated_at_ms FROM sessions ORDER BY session_id",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut summaries = Vec::new();
        for row in rows {
            let (session_id, status_json, updated_at_ms) = row?;
            let status: SessionStatus = serde_json::from_str(&status_json)?;
            summaries.push(PersistedSessionSummary {
                session_id,
                version: status.version,
                tick: status.tick,
                updated_at_ms: u64::try_from(updated_at_ms).unwrap_or(0),
            });
        }
        Ok(summaries)
    }
}
