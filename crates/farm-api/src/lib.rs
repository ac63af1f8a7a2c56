//! In-process API facade: envelope admission, drain/tick driving, and
//! debounced SQLite persistence around a `FarmSession`.

mod persistence;
mod server;

use std::path::Path;

use contracts::{
    ActionEnvelope, ApiError, ErrorCode, OutcomeEvent, SessionConfig, SessionEvent, SessionStatus,
    WorldState, SCHEMA_VERSION_V1,
};
use farm_core::{DrainMetrics, FarmSession};
use persistence::SqliteSessionStore;
pub use persistence::{PersistedSessionSummary, PersistenceError};
pub use server::{serve, ServerError};

#[derive(Debug)]
struct PersistenceState {
    store: SqliteSessionStore,
    persisted_outcome_count: usize,
}

pub struct SessionApi {
    session: FarmSession,
    outcome_log: Vec<OutcomeEvent>,
    persistence: Option<PersistenceState>,
    last_persistence_error: Option<String>,
    last_save_attempt_ms: Option<u64>,
}

impl SessionApi {
    pub fn from_config(config: SessionConfig) -> Self {
        Self::with_session(FarmSession::new(config))
    }

    /// Wrap a pre-wired session (custom registry, ledger, or cost port).
    pub fn with_session(session: FarmSession) -> Self {
        Self {
            session,
            outcome_log: Vec::new(),
            persistence: None,
            last_persistence_error: None,
            last_save_attempt_ms: None,
        }
    }

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let store = SqliteSessionStore::open(path)?;
        self.persistence = Some(PersistenceState {
            store,
            persisted_outcome_count: 0,
        });
        Ok(())
    }

    /// Restore the session from its latest persisted snapshot, if one exists.
    pub fn load_persisted_state(&mut self) -> Result<bool, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };
        let Some(snapshot) = state
            .store
            .load_latest_snapshot(self.session.session_id())?
        else {
            return Ok(false);
        };
        self.session.restore(&snapshot);
        Ok(true)
    }

    /// Register the joining player and return the full snapshot pushed to
    /// that client.
    pub fn join(&mut self, user_id: &str, now_ms: u64) -> WorldState {
        self.session.register_player(user_id, now_ms);
        self.session.world_state()
    }

    /// Admission control for the ingress path: schema gate only, then a
    /// non-blocking append. Payload shape was already enforced by the typed
    /// envelope; malformed JSON never reaches this point.
    pub fn submit_action(&mut self, envelope: ActionEnvelope) -> Result<usize, ApiError> {
        if envelope.schema_version != SCHEMA_VERSION_V1 {
            return Err(ApiError::new(
                ErrorCode::ContractVersionUnsupported,
                "unsupported schema_version",
                Some(format!(
                    "got={} expected={}",
                    envelope.schema_version, SCHEMA_VERSION_V1
                )),
            ));
        }
        self.session.submit(envelope);
        Ok(self.session.queue_depth())
    }

    /// One drain cycle plus the events it produced, with a debounced
    /// persistence flush afterwards.
    pub async fn drain_once(&mut self, now_ms: u64) -> (DrainMetrics, Vec<SessionEvent>) {
        let metrics = self.session.drain(now_ms).await;
        let events = self.session.take_events();
        self.record_outcomes(&events);
        self.flush_persistence_if_due(now_ms);
        (metrics, events)
    }

    /// One gameplay tick plus the events it produced.
    pub fn run_tick(&mut self, delta_ms: u64, now_ms: u64) -> Vec<SessionEvent> {
        self.session.run_tick(delta_ms, now_ms);
        let events = self.session.take_events();
        self.flush_persistence_if_due(now_ms);
        events
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    pub fn config(&self) -> &SessionConfig {
        self.session.config()
    }

    pub fn world_state(&self) -> WorldState {
        self.session.world_state()
    }

    pub fn outcome_log(&self) -> &[OutcomeEvent] {
        &self.outcome_log
    }

    /// Outcomes a reconnecting client missed, straight from the in-memory
    /// log; clients detect the gap through version discontinuity.
    pub fn outcomes_since(&self, since_version: u64) -> Vec<OutcomeEvent> {
        self.outcome_log
            .iter()
            .filter(|outcome| outcome.version > since_version)
            .cloned()
            .collect()
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    fn record_outcomes(&mut self, events: &[SessionEvent]) {
        for event in events {
            if let SessionEvent::Event(outcome) = event {
                self.outcome_log.push(outcome.clone());
            }
        }
    }

    /// Saves happen off the hot path on a debounced schedule: only when the
    /// session is dirty and the debounce window since the last attempt has
    /// elapsed.
    fn flush_persistence_if_due(&mut self, now_ms: u64) {
        if self.persistence.is_none() || !self.session.dirty() {
            return;
        }
        let debounce = self.session.config().snapshot_debounce_ms;
        let due = self
            .last_save_attempt_ms
            .map_or(true, |last| now_ms >= last + debounce);
        if !due {
            return;
        }
        if let Err(err) = self.flush_persistence_checked(now_ms) {
            tracing::warn!("snapshot persistence failed: {err}");
            self.last_persistence_error = Some(err.to_string());
        }
    }

    /// Unconditional flush, used by the debounced path, shutdown, and tests.
    pub fn flush_persistence_checked(&mut self, now_ms: u64) -> Result<(), PersistenceError> {
        if self.persistence.is_none() {
            return Err(PersistenceError::NotAttached);
        }
        self.last_save_attempt_ms = Some(now_ms);

        let config = self.session.config().clone();
        let status = self.session.status();
        let snapshot = self.session.world_state();
        let state = match self.persistence.as_mut() {
            Some(state) => state,
            None => return Err(PersistenceError::NotAttached),
        };
        let new_outcomes = &self.outcome_log[state.persisted_outcome_count..];

        state
            .store
            .persist_delta(&config, &status, &snapshot, new_outcomes, now_ms)?;
        state.persisted_outcome_count = self.outcome_log.len();
        self.session.mark_saved(now_ms);
        self.last_persistence_error = None;
        Ok(())
    }
}
