//! Database row types for mapping between `SQLite` rows and Rust structs.
//!
//! These represent the raw database row shape, not the public API types.
//! Conversion to public types happens in the store layer.

use serde::{Deserialize, Serialize};

/// Raw session row from the `sessions` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    /// Session ID (server-issued or synthetic).
    pub id: String,
    /// Instance the session belongs to.
    pub instance_id: String,
    /// Workspace the session belongs to, when known.
    pub workspace_id: Option<String>,
    /// Associated task ID.
    pub task_id: Option<String>,
    /// Resolved task title.
    pub task_title: Option<String>,
    /// Boundary timestamp in epoch milliseconds.
    pub created_at: i64,
    /// Completion timestamp, written once.
    pub completed_at: Option<i64>,
    /// Number of persisted events.
    pub event_count: i64,
    /// Last write timestamp in epoch milliseconds.
    pub updated_at: i64,
}

/// Raw event row from the `events` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    /// Stable event ID.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Array index at first insert; defines the read-back order.
    pub sequence: i64,
    /// Event timestamp in epoch milliseconds.
    pub timestamp: i64,
    /// Event type string.
    pub event_type: String,
    /// Normalized event payload as JSON.
    pub payload: String,
    /// Insertion timestamp in epoch milliseconds.
    pub inserted_at: i64,
}

/// Raw recovery row from the `recovery` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRow {
    /// Workspace the snapshot belongs to.
    pub workspace_id: String,
    /// Session active when the snapshot was taken, if any.
    pub session_id: Option<String>,
    /// Control state when the snapshot was taken (storage string form).
    pub control_state: String,
    /// Snapshot payload as JSON.
    pub payload: String,
    /// Last write timestamp in epoch milliseconds.
    pub updated_at: i64,
}
