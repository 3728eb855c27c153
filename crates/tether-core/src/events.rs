//! The normalized event model.
//!
//! Everything downstream of the wire boundary consumes [`NormalizedEvent`]s:
//! a closed, tagged set of variants with exactly the fields each kind needs.
//! All stringly-typed ambiguity lives in the `tether-protocol` parsing layer;
//! once an event exists as a `NormalizedEvent` it is immutable.
//!
//! Streaming fragments are first-class events ([`EventKind::Fragment`]) so
//! that the reducer can account for every input: each fragment ends up either
//! folded into a completed assistant event or held in the single live
//! [`StreamingMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::TaskId;

/// One unit of assistant message content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Extended thinking.
    Thinking {
        /// The thinking text.
        thinking: String,
    },
    /// A tool invocation.
    ToolUse {
        /// Tool call ID.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed tool input. An empty object when the accumulated input
        /// string failed to parse as JSON.
        input: Value,
    },
}

/// Payload of a fragment that opens a new content block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "blockType", rename_all = "snake_case")]
pub enum BlockStart {
    /// Opens a text block, optionally seeded with initial text.
    Text {
        /// Initial text (usually empty).
        #[serde(default)]
        text: String,
    },
    /// Opens a thinking block.
    Thinking,
    /// Opens a tool-use block whose input accumulates as a raw string.
    ToolUse {
        /// Tool call ID.
        id: String,
        /// Tool name.
        name: String,
    },
}

/// An incremental wire event describing part of an in-progress message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fragment", rename_all = "snake_case")]
pub enum Fragment {
    /// A new streamed message begins.
    MessageStart,
    /// A new content block begins.
    BlockStart(BlockStart),
    /// Incremental text appended to the active block. For tool-use blocks
    /// this is a slice of the not-yet-parseable input JSON string.
    BlockDelta {
        /// The delta text.
        text: String,
    },
    /// The streamed message is complete.
    MessageStop,
}

/// The closed set of event variants, each carrying exactly its fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A user message.
    User {
        /// The message text.
        text: String,
    },
    /// A complete assistant message (streamed-then-assembled, or a
    /// non-streamed "final form" delivery).
    Assistant {
        /// Ordered content blocks.
        blocks: Vec<ContentBlock>,
    },
    /// Output of a tool invocation.
    ToolResult {
        /// ID of the tool-use block this result answers.
        tool_use_id: String,
        /// Result content.
        content: String,
        /// Whether the tool failed.
        is_error: bool,
    },
    /// An error surfaced inline in the event stream.
    Error {
        /// Human-readable message.
        message: String,
    },
    /// A system notice.
    System {
        /// The notice text.
        text: String,
    },
    /// Session boundary marker: a new session begins here.
    SessionStart {
        /// Server-issued session ID, authoritative when present.
        #[serde(skip_serializing_if = "Option::is_none")]
        server_session_id: Option<String>,
    },
    /// A task started inside the session.
    TaskStarted {
        /// The task ID.
        task_id: TaskId,
        /// Embedded title, preferred over directory lookup when present.
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// The running task completed.
    TaskCompleted {
        /// The task ID, if the marker carried one.
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
    /// A raw streaming fragment, folded away by the reducer.
    Fragment(Fragment),
}

impl EventKind {
    /// Stable machine-readable name, used as the persisted `event_type`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::System { .. } => "system",
            Self::SessionStart { .. } => "session_start",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::Fragment(_) => "fragment",
        }
    }
}

/// A normalized event: immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    /// Server-assigned event ID, when the wire carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// The event variant.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl NormalizedEvent {
    /// Create an event without a server-assigned ID.
    #[must_use]
    pub fn new(timestamp: i64, kind: EventKind) -> Self {
        Self {
            server_id: None,
            timestamp,
            kind,
        }
    }

    /// Create an event carrying a server-assigned ID.
    #[must_use]
    pub fn with_server_id(timestamp: i64, kind: EventKind, server_id: impl Into<String>) -> Self {
        Self {
            server_id: Some(server_id.into()),
            timestamp,
            kind,
        }
    }

    /// Whether this is a raw streaming fragment.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        matches!(self.kind, EventKind::Fragment(_))
    }

    /// Whether this is a session boundary marker.
    #[must_use]
    pub fn is_boundary(&self) -> bool {
        matches!(self.kind, EventKind::SessionStart { .. })
    }
}

/// The at-most-one in-progress message being assembled from fragments.
///
/// Exists only between a `MessageStart` fragment and its matching
/// `MessageStop`; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingMessage {
    /// Timestamp of the opening `MessageStart` fragment.
    pub timestamp: i64,
    /// Ordered content blocks assembled so far.
    pub blocks: Vec<ContentBlock>,
}
