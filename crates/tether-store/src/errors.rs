//! Store error types.

use thiserror::Error;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A `SQLite` operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The connection pool could not provide a connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    /// A stored payload could not be serialized or deserialized.
    #[error("payload serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A schema migration failed.
    #[error("migration failed: {message}")]
    Migration {
        /// What went wrong.
        message: String,
    },
    /// A referenced session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
