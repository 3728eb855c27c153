//! Debounced persistence coordinator.
//!
//! Sits between the in-memory session view and the [`SessionStore`]. Writes
//! are snapshot-shaped and idempotent, so the coordinator can coalesce
//! freely: each `schedule` call replaces the session's pending snapshot and
//! restarts the debounce timer. When the timer fires, every pending
//! snapshot is persisted in one pass.
//!
//! `flush` forces an immediate write (used before shutdown and when a
//! session closes).
//!
//! `SQLite` calls block, so each write runs on the blocking pool via
//! `spawn_blocking` and is awaited before the next message is taken. That
//! keeps the runtime's async threads free while preserving write order,
//! and makes `flush` an ordering barrier for everything sent before it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use tether_core::SessionId;

use crate::errors::StoreError;
use crate::store::{SessionSnapshot, SessionStore};

enum Msg {
    Schedule(SessionSnapshot),
    PersistNow(SessionSnapshot),
    Discard(SessionId),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the coordinator task.
pub struct PersistenceCoordinator {
    tx: mpsc::UnboundedSender<Msg>,
}

impl PersistenceCoordinator {
    /// Spawn the coordinator task.
    pub fn spawn(store: Arc<SessionStore>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tokio::spawn(run(store, debounce, rx));
        Self { tx }
    }

    /// Schedule a snapshot write, replacing any pending snapshot for the
    /// same session and restarting the debounce timer.
    pub fn schedule(&self, snapshot: SessionSnapshot) {
        let _ = self.tx.send(Msg::Schedule(snapshot));
    }

    /// Persist one snapshot without waiting out the debounce (used when a
    /// new session is first detected and when one completes).
    pub fn persist_now(&self, snapshot: SessionSnapshot) {
        let _ = self.tx.send(Msg::PersistNow(snapshot));
    }

    /// Drop any pending snapshot for the session and delete it from the
    /// store, including one that was already eagerly written.
    pub fn discard(&self, session_id: SessionId) {
        let _ = self.tx.send(Msg::Discard(session_id));
    }

    /// Persist everything pending right now.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Msg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Flush pending writes and stop the coordinator task.
    pub async fn shutdown(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Msg::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run(
    store: Arc<SessionStore>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Msg>,
) {
    let mut pending: HashMap<String, SessionSnapshot> = HashMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Msg::Schedule(snapshot)) => {
                    let _ = pending.insert(snapshot.session.id.to_string(), snapshot);
                    deadline = Some(Instant::now() + debounce);
                }
                Some(Msg::PersistNow(snapshot)) => {
                    let _ = pending.remove(snapshot.session.id.as_str());
                    persist_batch(&store, vec![snapshot]).await;
                }
                Some(Msg::Discard(session_id)) => {
                    let _ = pending.remove(session_id.as_str());
                    discard_session(&store, session_id).await;
                }
                Some(Msg::Flush(ack)) => {
                    flush_pending(&store, &mut pending).await;
                    deadline = None;
                    let _ = ack.send(());
                }
                Some(Msg::Shutdown(ack)) => {
                    flush_pending(&store, &mut pending).await;
                    let _ = ack.send(());
                    break;
                }
                None => {
                    flush_pending(&store, &mut pending).await;
                    break;
                }
            },
            () = timer => {
                flush_pending(&store, &mut pending).await;
                deadline = None;
            }
        }
    }
    debug!("persistence coordinator stopped");
}

async fn flush_pending(store: &Arc<SessionStore>, pending: &mut HashMap<String, SessionSnapshot>) {
    let snapshots: Vec<SessionSnapshot> = pending.drain().map(|(_, s)| s).collect();
    persist_batch(store, snapshots).await;
}

async fn persist_batch(store: &Arc<SessionStore>, snapshots: Vec<SessionSnapshot>) {
    if snapshots.is_empty() {
        return;
    }
    let store = Arc::clone(store);
    let write = tokio::task::spawn_blocking(move || {
        for snapshot in &snapshots {
            let session_id = snapshot.session.id.as_str();
            match store.persist(snapshot) {
                Ok(outcome) => {
                    debug!(
                        session_id,
                        inserted = outcome.inserted_events,
                        total = outcome.total_events,
                        "flushed session snapshot"
                    );
                }
                // The next schedule carries the full snapshot again, so a
                // failed write is retried implicitly.
                Err(e) => warn!(session_id, error = %e, "failed to persist snapshot"),
            }
        }
    });
    if let Err(e) = write.await {
        warn!(error = %e, "persist task panicked");
    }
}

async fn discard_session(store: &Arc<SessionStore>, session_id: SessionId) {
    let store = Arc::clone(store);
    let delete = tokio::task::spawn_blocking(move || {
        match store.delete_session(&session_id) {
            Ok(()) => debug!(session_id = %session_id, "discarded session"),
            Err(StoreError::SessionNotFound(_)) => {}
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to discard session");
            }
        }
    });
    if let Err(e) = delete.await {
        warn!(error = %e, "discard task panicked");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
