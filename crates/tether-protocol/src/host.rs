//! Host-facing types: dispatch commands and the typed event stream.
//!
//! Subscribers receive [`MuxEvent`]s in transport-receipt order and send
//! [`Command`]s; they never touch the multiplexer's state directly.

use serde::{Deserialize, Serialize};

use tether_core::{ControlState, NormalizedEvent, SessionId};

/// A control command dispatched by the host UI.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Begin a run: `Idle → Running`, connect, then resume or create a
    /// session. Carries an optional session to resume.
    Start {
        /// Session to resume instead of creating a new one.
        resume: Option<SessionId>,
    },
    /// `Running → Paused`.
    Pause,
    /// `Paused → Running`.
    Resume,
    /// `Running | Paused → Idle`.
    Stop,
    /// Send a user message into the active session.
    SendMessage {
        /// Message text.
        text: String,
    },
    /// Stop once the current task completes.
    StopAfterCurrent,
    /// Cancel a pending stop-after-current.
    CancelStopAfterCurrent,
}

impl Command {
    /// Machine-readable command name, used in rejection messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::SendMessage { .. } => "send_message",
            Self::StopAfterCurrent => "stop_after_current",
            Self::CancelStopAfterCurrent => "cancel_stop_after_current",
        }
    }
}

/// Classification of a typed error event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The transport dropped or failed; a reconnect may follow.
    Transport,
    /// A dispatched command was invalid in the current state.
    CommandRejected,
    /// A wire message could not be decoded.
    Parse,
}

/// A typed error surfaced inline on the event stream — never thrown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorEvent {
    /// Build a transport failure event.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: message.into(),
        }
    }

    /// Build a command rejection event.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::CommandRejected,
            message: message.into(),
        }
    }

    /// Build a parse failure event.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Parse,
            message: message.into(),
        }
    }
}

/// Event broadcast to every subscriber of a workspace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MuxEvent {
    /// The control state changed (also replayed to late joiners).
    StateChange {
        /// The new control state.
        state: ControlState,
    },
    /// One normalized event from the transport.
    Event {
        /// The event.
        event: NormalizedEvent,
    },
    /// Buffered events delivered after a reconnect.
    PendingEvents {
        /// The batch, in receipt order.
        events: Vec<NormalizedEvent>,
    },
    /// The transport connected.
    Connected,
    /// The transport disconnected; a reconnect may be scheduled.
    Disconnected,
    /// The server created a session for this workspace.
    SessionCreated {
        /// Server-issued session ID.
        session_id: SessionId,
    },
    /// Replay of the active session to a late-joining subscriber.
    SessionRestored {
        /// The active session ID.
        session_id: SessionId,
    },
    /// Whether a message is currently streaming.
    StreamingState {
        /// True between `message_start` and `message_stop`.
        active: bool,
    },
    /// The stop-after-current flag changed.
    StopAfterCurrentChange {
        /// The new flag value.
        enabled: bool,
    },
    /// A typed error, rendered inline in the event stream.
    Error {
        /// The error.
        error: ErrorEvent,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::EventKind;

    #[test]
    fn command_names() {
        assert_eq!(Command::Start { resume: None }.name(), "start");
        assert_eq!(Command::SendMessage { text: "x".into() }.name(), "send_message");
        assert_eq!(Command::CancelStopAfterCurrent.name(), "cancel_stop_after_current");
    }

    #[test]
    fn error_event_constructors() {
        let err = ErrorEvent::rejected("pause requires running");
        assert_eq!(err.kind, ErrorKind::CommandRejected);
        assert_eq!(err.message, "pause requires running");
    }

    #[test]
    fn mux_event_wire_shape() {
        let event = MuxEvent::StateChange {
            state: ControlState::Running,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "state_change", "state": "running"}));
    }

    #[test]
    fn session_restored_uses_camel_case() {
        let event = MuxEvent::SessionRestored {
            session_id: SessionId::from("abc"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session_restored");
        assert_eq!(value["sessionId"], "abc");
    }

    #[test]
    fn error_event_roundtrip() {
        let event = MuxEvent::Error {
            error: ErrorEvent::transport("connection reset"),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: MuxEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn event_variant_carries_normalized_event() {
        let event = MuxEvent::Event {
            event: NormalizedEvent::new(9, EventKind::User { text: "hi".into() }),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"]["kind"], "user");
    }
}
