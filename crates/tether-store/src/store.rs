//! High-level transactional `SessionStore` API.
//!
//! Composes the repositories into atomic, session-centric methods. Every
//! write method runs inside a single `SQLite` transaction, so callers never
//! observe partial state.
//!
//! Persisting is snapshot-shaped and idempotent: the coordinator hands over
//! the full current view of a session and the store upserts the session row
//! and insert-or-ignores every event by its stable ID.

use serde_json::Value;
use tracing::debug;

use tether_core::{ControlState, NormalizedEvent, SessionId, TaskId, WorkspaceId};

use crate::errors::{Result, StoreError};
use crate::identity::stable_event_id;
use crate::sqlite::connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory,
};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::event::EventRepo;
use crate::sqlite::repositories::recovery::RecoveryRepo;
use crate::sqlite::repositories::session::{ListSessionsOptions, SessionRepo};
use crate::sqlite::row_types::{EventRow, RecoveryRow, SessionRow};

/// Session metadata as the rest of the system sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    /// Session ID (server-issued or synthetic).
    pub id: SessionId,
    /// Instance the session belongs to.
    pub instance_id: String,
    /// Workspace the session belongs to, when known.
    pub workspace_id: Option<WorkspaceId>,
    /// Associated task, if any.
    pub task_id: Option<TaskId>,
    /// Resolved task title, if any.
    pub task_title: Option<String>,
    /// Boundary timestamp in epoch milliseconds.
    pub created_at: i64,
    /// Completion timestamp, written once.
    pub completed_at: Option<i64>,
    /// Number of persisted events. Zero until the first persist; refreshed
    /// on every write and on load.
    pub event_count: i64,
}

/// The full current view of a session, handed to [`SessionStore::persist`].
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    /// Session metadata.
    pub session: SessionRecord,
    /// Completed (post-reduction) events. Fragments are never persisted.
    pub events: Vec<NormalizedEvent>,
}

/// The workspace's crash-recovery state: the active session (if any), the
/// control state at the time of the save, and the in-flight events.
#[derive(Clone, Debug, PartialEq)]
pub struct RecoverySnapshot {
    /// Session active when the snapshot was taken, if any.
    pub session_id: Option<SessionId>,
    /// Control state when the snapshot was taken.
    pub control: ControlState,
    /// In-flight events not yet persisted through the normal path.
    pub events: Vec<NormalizedEvent>,
}

/// What a persist call actually wrote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Events newly inserted by this call.
    pub inserted_events: usize,
    /// Total events now stored for the session.
    pub total_events: i64,
}

/// High-level store wrapping a connection pool and the repositories.
pub struct SessionStore {
    pool: ConnectionPool,
}

impl SessionStore {
    /// Open a file-backed store, running migrations.
    pub fn open(path: &str) -> Result<Self> {
        let pool = new_file(path, &ConnectionConfig::default())?;
        let store = Self { pool };
        let conn = store.conn()?;
        let _ = run_migrations(&conn)?;
        Ok(store)
    }

    /// Open an in-memory store (for testing), running migrations.
    pub fn in_memory() -> Result<Self> {
        let pool = new_in_memory(&ConnectionConfig::default())?;
        let store = Self { pool };
        let conn = store.conn()?;
        let _ = run_migrations(&conn)?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions and events
    // ─────────────────────────────────────────────────────────────────────

    /// Persist a session snapshot.
    ///
    /// Atomic and idempotent: the session row is upserted (`completed_at`
    /// write-once), each event is inserted by stable ID with duplicates
    /// ignored, and the denormalized event count is refreshed.
    pub fn persist(&self, snapshot: &SessionSnapshot) -> Result<PersistOutcome> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = chrono::Utc::now().timestamp_millis();
        let session_id = snapshot.session.id.as_str();

        SessionRepo::upsert(
            &tx,
            &SessionRow {
                id: session_id.to_string(),
                instance_id: snapshot.session.instance_id.clone(),
                workspace_id: snapshot
                    .session
                    .workspace_id
                    .as_ref()
                    .map(ToString::to_string),
                task_id: snapshot.session.task_id.as_ref().map(ToString::to_string),
                task_title: snapshot.session.task_title.clone(),
                created_at: snapshot.session.created_at,
                completed_at: snapshot.session.completed_at,
                event_count: 0,
                updated_at: now,
            },
        )?;

        // Sequence is the event's index among the snapshot's non-fragment
        // events. The array is append-only, so a duplicate insert (ignored)
        // always carries the same sequence the row was first written with.
        let mut inserted_events = 0;
        let mut sequence: i64 = 0;
        for event in &snapshot.events {
            if event.is_fragment() {
                continue;
            }
            let row = EventRow {
                id: stable_event_id(&snapshot.session.id, event),
                session_id: session_id.to_string(),
                sequence,
                timestamp: event.timestamp,
                event_type: event.kind.name().to_string(),
                payload: serde_json::to_string(event)?,
                inserted_at: now,
            };
            sequence += 1;
            if EventRepo::insert_ignore(&tx, &row)? {
                inserted_events += 1;
            }
        }

        let total_events = EventRepo::count_for_session(&tx, session_id)?;
        SessionRepo::set_event_count(&tx, session_id, total_events)?;

        tx.commit()?;
        debug!(session_id, inserted_events, total_events, "persisted snapshot");

        Ok(PersistOutcome {
            inserted_events,
            total_events,
        })
    }

    /// Load a session's metadata and events.
    pub fn load_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<(SessionRecord, Vec<NormalizedEvent>)>> {
        let conn = self.conn()?;
        let Some(row) = SessionRepo::get_by_id(&conn, session_id.as_str())? else {
            return Ok(None);
        };

        let mut events = Vec::new();
        for event_row in EventRepo::list_for_session(&conn, session_id.as_str())? {
            events.push(serde_json::from_str(&event_row.payload)?);
        }
        Ok(Some((record_from_row(row), events)))
    }

    /// List stored sessions, newest first.
    pub fn list_sessions(&self, instance_id: Option<&str>) -> Result<Vec<SessionRecord>> {
        let conn = self.conn()?;
        let rows = SessionRepo::list(
            &conn,
            &ListSessionsOptions {
                instance_id,
                ..Default::default()
            },
        )?;
        Ok(rows.into_iter().map(record_from_row).collect())
    }

    /// Delete a session and its events.
    pub fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        let conn = self.conn()?;
        if !SessionRepo::delete(&conn, session_id.as_str())? {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recovery snapshots
    // ─────────────────────────────────────────────────────────────────────

    /// Save the workspace's crash-recovery snapshot, overwriting any
    /// previous one.
    pub fn save_recovery(
        &self,
        workspace_id: &WorkspaceId,
        snapshot: &RecoverySnapshot,
    ) -> Result<()> {
        let conn = self.conn()?;
        RecoveryRepo::put(
            &conn,
            &RecoveryRow {
                workspace_id: workspace_id.to_string(),
                session_id: snapshot.session_id.as_ref().map(ToString::to_string),
                control_state: snapshot.control.to_string(),
                payload: serde_json::to_string(&snapshot.events)?,
                updated_at: chrono::Utc::now().timestamp_millis(),
            },
        )
    }

    /// Load the workspace's crash-recovery snapshot, if one exists.
    pub fn load_recovery(&self, workspace_id: &WorkspaceId) -> Result<Option<RecoverySnapshot>> {
        let conn = self.conn()?;
        let Some(row) = RecoveryRepo::get(&conn, workspace_id.as_str())? else {
            return Ok(None);
        };
        Ok(Some(RecoverySnapshot {
            session_id: row.session_id.map(SessionId::from),
            control: ControlState::parse(&row.control_state).unwrap_or(ControlState::Idle),
            events: serde_json::from_str(&row.payload)?,
        }))
    }

    /// Clear the workspace's crash-recovery snapshot.
    pub fn clear_recovery(&self, workspace_id: &WorkspaceId) -> Result<()> {
        let conn = self.conn()?;
        let _ = RecoveryRepo::clear(&conn, workspace_id.as_str())?;
        Ok(())
    }

    /// Raw recovery payload as JSON, for diagnostics.
    pub fn recovery_payload(&self, workspace_id: &WorkspaceId) -> Result<Option<Value>> {
        let conn = self.conn()?;
        match RecoveryRepo::get(&conn, workspace_id.as_str())? {
            Some(row) => Ok(Some(serde_json::from_str(&row.payload)?)),
            None => Ok(None),
        }
    }
}

fn record_from_row(row: SessionRow) -> SessionRecord {
    SessionRecord {
        id: SessionId::from(row.id),
        instance_id: row.instance_id,
        workspace_id: row.workspace_id.map(WorkspaceId::from),
        task_id: row.task_id.map(TaskId::from),
        task_title: row.task_title,
        created_at: row.created_at,
        completed_at: row.completed_at,
        event_count: row.event_count,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
