//! Error types for the wire boundary.

use thiserror::Error;

/// Errors raised while decoding wire messages.
///
/// Every variant is recoverable: a bad message is dropped (with a
/// diagnostic) rather than crashing the receive loop.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame was not valid JSON.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` discriminator was missing or not a string.
    #[error("missing type discriminator")]
    MissingType,

    /// The `type` discriminator named no known message kind.
    #[error("unknown wire type: {0}")]
    UnknownType(String),

    /// A known message kind was missing a required field.
    #[error("missing field `{field}` in `{message_type}`")]
    MissingField {
        /// The message kind being decoded.
        message_type: String,
        /// The absent field.
        field: String,
    },
}

/// Convenience type alias for wire results.
pub type Result<T> = std::result::Result<T, WireError>;
