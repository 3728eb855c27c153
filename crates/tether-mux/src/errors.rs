//! Multiplexer error types.

use thiserror::Error;

/// Errors that can occur in the multiplexer.
#[derive(Debug, Error)]
pub enum MuxError {
    /// A transport operation failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The actor task has stopped; the handle is dead.
    #[error("multiplexer is closed")]
    Closed,
}

/// Result type for multiplexer operations.
pub type Result<T> = std::result::Result<T, MuxError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display() {
        let err = MuxError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "transport error: connection refused");
    }

    #[test]
    fn closed_error_display() {
        assert_eq!(MuxError::Closed.to_string(), "multiplexer is closed");
    }
}
