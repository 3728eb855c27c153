//! Recovery cache implementations.
//!
//! [`StoreRecoveryCache`] persists each workspace's last-known session and
//! control state in the sqlite recovery table so a host reload can resume
//! where it left off. `SQLite` calls block, so every store access runs on
//! the blocking pool. [`MemoryRecoveryCache`] is the in-process equivalent
//! for tests and hosts that do not persist.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use tether_core::WorkspaceId;
use tether_store::{RecoverySnapshot, SessionStore};

use crate::traits::{RecoveredState, RecoveryCache};

/// Sqlite-backed recovery cache.
pub struct StoreRecoveryCache {
    store: Arc<SessionStore>,
}

impl StoreRecoveryCache {
    /// Wrap a store.
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecoveryCache for StoreRecoveryCache {
    async fn load(&self, workspace_id: &WorkspaceId) -> Option<RecoveredState> {
        let store = Arc::clone(&self.store);
        let ws = workspace_id.clone();
        match tokio::task::spawn_blocking(move || store.load_recovery(&ws)).await {
            Ok(Ok(found)) => found.map(|snapshot| RecoveredState {
                session_id: snapshot.session_id,
                control: snapshot.control,
            }),
            Ok(Err(e)) => {
                warn!(workspace_id = %workspace_id, error = %e, "failed to load recovery entry");
                None
            }
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "recovery load task panicked");
                None
            }
        }
    }

    async fn save(&self, workspace_id: &WorkspaceId, state: &RecoveredState) {
        let store = Arc::clone(&self.store);
        let ws = workspace_id.clone();
        let snapshot = RecoverySnapshot {
            session_id: state.session_id.clone(),
            control: state.control,
            events: Vec::new(),
        };
        let result =
            tokio::task::spawn_blocking(move || store.save_recovery(&ws, &snapshot)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(workspace_id = %workspace_id, error = %e, "failed to save recovery entry");
            }
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "recovery save task panicked");
            }
        }
    }

    async fn clear(&self, workspace_id: &WorkspaceId) {
        let store = Arc::clone(&self.store);
        let ws = workspace_id.clone();
        let result = tokio::task::spawn_blocking(move || store.clear_recovery(&ws)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(workspace_id = %workspace_id, error = %e, "failed to clear recovery entry");
            }
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "recovery clear task panicked");
            }
        }
    }
}

/// In-memory recovery cache.
#[derive(Default)]
pub struct MemoryRecoveryCache {
    entries: Mutex<HashMap<WorkspaceId, RecoveredState>>,
}

impl MemoryRecoveryCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecoveryCache for MemoryRecoveryCache {
    async fn load(&self, workspace_id: &WorkspaceId) -> Option<RecoveredState> {
        self.entries.lock().get(workspace_id).cloned()
    }

    async fn save(&self, workspace_id: &WorkspaceId, state: &RecoveredState) {
        let _ = self
            .entries
            .lock()
            .insert(workspace_id.clone(), state.clone());
    }

    async fn clear(&self, workspace_id: &WorkspaceId) {
        let _ = self.entries.lock().remove(workspace_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
