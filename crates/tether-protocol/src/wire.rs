//! Wire-format envelope types for the WebSocket transport.
//!
//! Both directions are JSON objects discriminated by `type`. Inner event
//! payloads inside `event` / `pending_events` envelopes stay opaque
//! ([`serde_json::Value`]) here; [`crate::parse`] converts them into the
//! closed normalized model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tether_core::{SessionId, WorkspaceId};

/// Message received from the agent server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Heartbeat acknowledgement. Consumed, never forwarded.
    Pong,
    /// The server created (or resumed into) a session.
    SessionCreated {
        /// Server-issued session ID.
        session_id: String,
    },
    /// Buffered events delivered in one batch after a reconnect.
    PendingEvents {
        /// Raw wire events, in original receipt order.
        events: Vec<Value>,
    },
    /// Server status notice.
    Status {
        /// Free-form status text.
        message: String,
    },
    /// Server-reported error.
    Error {
        /// Human-readable error message.
        message: String,
    },
    /// A single event envelope.
    Event {
        /// The raw wire event.
        event: Value,
    },
}

impl ServerMessage {
    /// Decode one frame of transport text.
    pub fn decode(text: &str) -> crate::errors::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Command sent to the agent server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Keep-alive.
    Ping,
    /// Resume an existing session after (re)connect.
    Reconnect {
        /// The session to resume.
        session_id: SessionId,
    },
    /// Ask the server to create a fresh session for a workspace.
    CreateSession {
        /// The workspace the session belongs to.
        workspace_id: WorkspaceId,
    },
    /// Send a user message into a session.
    Message {
        /// Target session.
        session_id: SessionId,
        /// Message text.
        text: String,
    },
}

impl ClientCommand {
    /// Encode to one frame of transport text.
    pub fn encode(&self) -> crate::errors::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
