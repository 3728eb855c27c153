//! Boundary-driven persistence.
//!
//! [`SessionPersister`] turns a boundary [`Analysis`] into coordinator
//! calls. The rules per detected session:
//!
//! - first sighting of a session id: write immediately, so a freshly
//!   started session survives a crash within the debounce window
//! - a session that just closed and is worth keeping: write immediately,
//!   completion must not wait out a debounce
//! - a closed session judged noise: discard it, including one that was
//!   already eagerly written, and never persist that id again
//! - everything else (the active session growing): debounce
//!
//! Snapshot writes are idempotent, so the eager and debounced paths can
//! overlap freely.

use std::collections::HashSet;

use tether_core::{NormalizedEvent, WorkspaceId};
use tether_stream::{Analysis, DetectedSession};

use crate::coordinator::PersistenceCoordinator;
use crate::store::{SessionRecord, SessionSnapshot};

/// Drives the [`PersistenceCoordinator`] from boundary analyses.
pub struct SessionPersister {
    coordinator: PersistenceCoordinator,
    workspace_id: Option<WorkspaceId>,
    seen: HashSet<String>,
    completed: HashSet<String>,
    discarded: HashSet<String>,
}

impl SessionPersister {
    /// Create a persister on top of a coordinator.
    #[must_use]
    pub fn new(coordinator: PersistenceCoordinator) -> Self {
        Self {
            coordinator,
            workspace_id: None,
            seen: HashSet::new(),
            completed: HashSet::new(),
            discarded: HashSet::new(),
        }
    }

    /// Attribute persisted sessions to a workspace.
    #[must_use]
    pub fn with_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    /// Apply one boundary analysis of the event history.
    ///
    /// `events` must be the same slice the analysis was produced from;
    /// each session's snapshot is cut from it by segment position.
    pub fn ingest(&mut self, analysis: &Analysis, events: &[NormalizedEvent]) {
        for detected in &analysis.sessions {
            let id = detected.info.id.as_str();
            if self.discarded.contains(id) {
                continue;
            }

            if detected.closed && !detected.keep {
                self.coordinator.discard(detected.info.id.clone());
                let _ = self.discarded.insert(id.to_string());
                let _ = self.seen.remove(id);
                continue;
            }

            let snapshot = self.snapshot_for(detected, events);
            let newly_seen = self.seen.insert(id.to_string());
            let newly_closed = detected.closed && self.completed.insert(id.to_string());
            if newly_seen || newly_closed {
                self.coordinator.persist_now(snapshot);
            } else {
                self.coordinator.schedule(snapshot);
            }
        }
    }

    /// Persist everything pending right now.
    pub async fn flush(&self) {
        self.coordinator.flush().await;
    }

    /// Flush pending writes and stop the underlying coordinator.
    pub async fn shutdown(self) {
        self.coordinator.shutdown().await;
    }

    fn snapshot_for(
        &self,
        detected: &DetectedSession,
        events: &[NormalizedEvent],
    ) -> SessionSnapshot {
        let info = &detected.info;
        let end = info.start_index + info.event_count;
        let segment = events.get(info.start_index..end).unwrap_or(&[]);
        SessionSnapshot {
            session: SessionRecord {
                id: info.id.clone(),
                instance_id: info.instance_id.clone(),
                workspace_id: self.workspace_id.clone(),
                task_id: info.task_id.clone(),
                task_title: info.task_title.clone(),
                created_at: info.created_at,
                completed_at: info.completed_at,
                // Refreshed by the store on write.
                event_count: 0,
            },
            events: segment.to_vec(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
