//! The stringly-typed parsing layer.
//!
//! Raw wire events are loose JSON objects discriminated by a `type` string.
//! [`parse_wire_event`] is the single place that ambiguity is resolved into
//! the closed [`EventKind`] sum type; everything downstream works with
//! exactly-typed variants.
//!
//! A timestamp of `0` is a valid-looking but meaningless value produced by
//! malformed upstream events. Parsing preserves it verbatim — the session
//! boundary detector decides whether to trust it.

use serde_json::Value;
use tracing::debug;

use tether_core::{BlockStart, ContentBlock, EventKind, Fragment, NormalizedEvent, TaskId};

use crate::errors::{Result, WireError};

/// Parse one raw wire event into a [`NormalizedEvent`].
///
/// Unknown `type` strings and missing required fields are errors; callers
/// drop the single bad event and keep the receive loop alive.
pub fn parse_wire_event(raw: &Value) -> Result<NormalizedEvent> {
    let event_type = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or(WireError::MissingType)?;

    let timestamp = raw.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
    let server_id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    let kind = match event_type {
        "init" => EventKind::SessionStart {
            server_session_id: raw
                .get("serverSessionId")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        },
        "user" => EventKind::User {
            text: require_str(raw, event_type, "text")?,
        },
        "assistant" => EventKind::Assistant {
            blocks: parse_blocks(raw.get("blocks")),
        },
        "tool_result" => EventKind::ToolResult {
            tool_use_id: require_str(raw, event_type, "toolUseId")?,
            content: raw
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            is_error: raw.get("isError").and_then(Value::as_bool).unwrap_or(false),
        },
        "error" => EventKind::Error {
            message: require_str(raw, event_type, "message")?,
        },
        "system" => EventKind::System {
            text: require_str(raw, event_type, "text")?,
        },
        "task_started" => EventKind::TaskStarted {
            task_id: TaskId::from(require_str(raw, event_type, "taskId")?),
            title: raw
                .get("title")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        },
        "task_completed" => EventKind::TaskCompleted {
            task_id: raw
                .get("taskId")
                .and_then(Value::as_str)
                .map(|s| TaskId::from(s.to_owned())),
        },
        "message_start" => EventKind::Fragment(Fragment::MessageStart),
        "message_stop" => EventKind::Fragment(Fragment::MessageStop),
        "block_start" => EventKind::Fragment(Fragment::BlockStart(parse_block_start(raw)?)),
        "block_delta" => EventKind::Fragment(Fragment::BlockDelta {
            text: raw
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }),
        other => {
            debug!(event_type = other, "dropping unknown wire event type");
            return Err(WireError::UnknownType(other.to_owned()));
        }
    };

    Ok(NormalizedEvent {
        server_id,
        timestamp,
        kind,
    })
}

/// Parse a batch of raw wire events, dropping individual bad ones.
///
/// Order is preserved for the events that survive; each dropped event is
/// logged with its decode error.
#[must_use]
pub fn parse_wire_events(raw: &[Value]) -> Vec<NormalizedEvent> {
    raw.iter()
        .filter_map(|value| match parse_wire_event(value) {
            Ok(event) => Some(event),
            Err(err) => {
                debug!(error = %err, "dropping undecodable wire event");
                None
            }
        })
        .collect()
}

fn require_str(raw: &Value, message_type: &str, field: &str) -> Result<String> {
    raw.get(field)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| WireError::MissingField {
            message_type: message_type.to_owned(),
            field: field.to_owned(),
        })
}

fn parse_block_start(raw: &Value) -> Result<BlockStart> {
    match raw.get("blockType").and_then(Value::as_str) {
        Some("text") => Ok(BlockStart::Text {
            text: raw
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }),
        Some("thinking") => Ok(BlockStart::Thinking),
        Some("tool_use") => Ok(BlockStart::ToolUse {
            id: require_str(raw, "block_start", "toolUseId")?,
            name: require_str(raw, "block_start", "name")?,
        }),
        Some(other) => Err(WireError::UnknownType(format!("block_start/{other}"))),
        None => Err(WireError::MissingField {
            message_type: "block_start".into(),
            field: "blockType".into(),
        }),
    }
}

/// Parse the content blocks of a non-streamed assistant event.
///
/// Unrecognized block shapes are skipped rather than failing the whole
/// event — a partially-renderable assistant message beats a dropped one.
fn parse_blocks(raw: Option<&Value>) -> Vec<ContentBlock> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|block| match block.get("type").and_then(Value::as_str) {
            Some("text") => Some(ContentBlock::Text {
                text: block
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            }),
            Some("thinking") => Some(ContentBlock::Thinking {
                thinking: block
                    .get("thinking")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            }),
            Some("tool_use") => Some(ContentBlock::ToolUse {
                id: block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                name: block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                input: block.get("input").cloned().unwrap_or(Value::Null),
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn parse_init_with_server_session_id() {
        let event = parse_wire_event(&json!({
            "type": "init",
            "timestamp": 1000,
            "serverSessionId": "abc",
        }))
        .unwrap();
        assert_eq!(event.timestamp, 1000);
        assert_matches!(
            event.kind,
            EventKind::SessionStart { server_session_id: Some(id) } if id == "abc"
        );
    }

    #[test]
    fn parse_init_without_session_id() {
        let event = parse_wire_event(&json!({"type": "init", "timestamp": 5})).unwrap();
        assert_matches!(
            event.kind,
            EventKind::SessionStart {
                server_session_id: None
            }
        );
    }

    #[test]
    fn missing_timestamp_parses_as_zero() {
        // Zero is preserved here; trusting it is the detector's call.
        let event = parse_wire_event(&json!({"type": "init"})).unwrap();
        assert_eq!(event.timestamp, 0);
    }

    #[test]
    fn parse_user_message() {
        let event =
            parse_wire_event(&json!({"type": "user", "timestamp": 7, "text": "hi"})).unwrap();
        assert_matches!(event.kind, EventKind::User { text } if text == "hi");
    }

    #[test]
    fn user_without_text_is_missing_field() {
        let err = parse_wire_event(&json!({"type": "user"})).unwrap_err();
        assert_matches!(err, WireError::MissingField { field, .. } if field == "text");
    }

    #[test]
    fn parse_assistant_blocks() {
        let event = parse_wire_event(&json!({
            "type": "assistant",
            "timestamp": 10,
            "blocks": [
                {"type": "text", "text": "hello"},
                {"type": "thinking", "thinking": "hmm"},
                {"type": "tool_use", "id": "call_1", "name": "Bash", "input": {"command": "ls"}},
                {"type": "banana"},
            ],
        }))
        .unwrap();
        let EventKind::Assistant { blocks } = event.kind else {
            panic!("wrong kind");
        };
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[2],
            ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "Bash".into(),
                input: json!({"command": "ls"}),
            }
        );
    }

    #[test]
    fn parse_tool_result() {
        let event = parse_wire_event(&json!({
            "type": "tool_result",
            "timestamp": 11,
            "toolUseId": "call_1",
            "content": "out",
            "isError": true,
        }))
        .unwrap();
        assert_eq!(
            event.kind,
            EventKind::ToolResult {
                tool_use_id: "call_1".into(),
                content: "out".into(),
                is_error: true,
            }
        );
    }

    #[test]
    fn parse_task_markers() {
        let started = parse_wire_event(&json!({
            "type": "task_started",
            "timestamp": 50,
            "taskId": "r-1",
            "title": "Fix the bug",
        }))
        .unwrap();
        assert_matches!(
            started.kind,
            EventKind::TaskStarted { task_id, title: Some(t) }
                if task_id.as_str() == "r-1" && t == "Fix the bug"
        );

        let completed =
            parse_wire_event(&json!({"type": "task_completed", "timestamp": 300})).unwrap();
        assert_matches!(completed.kind, EventKind::TaskCompleted { task_id: None });
    }

    #[test]
    fn parse_fragments() {
        assert_matches!(
            parse_wire_event(&json!({"type": "message_start", "timestamp": 1}))
                .unwrap()
                .kind,
            EventKind::Fragment(Fragment::MessageStart)
        );
        assert_matches!(
            parse_wire_event(&json!({
                "type": "block_start",
                "timestamp": 2,
                "blockType": "tool_use",
                "toolUseId": "call_2",
                "name": "Read",
            }))
            .unwrap()
            .kind,
            EventKind::Fragment(Fragment::BlockStart(BlockStart::ToolUse { id, name }))
                if id == "call_2" && name == "Read"
        );
        assert_matches!(
            parse_wire_event(&json!({"type": "block_delta", "timestamp": 3, "text": "par"}))
                .unwrap()
                .kind,
            EventKind::Fragment(Fragment::BlockDelta { text }) if text == "par"
        );
        assert_matches!(
            parse_wire_event(&json!({"type": "message_stop", "timestamp": 4}))
                .unwrap()
                .kind,
            EventKind::Fragment(Fragment::MessageStop)
        );
    }

    #[test]
    fn block_start_without_block_type_errors() {
        let err = parse_wire_event(&json!({"type": "block_start"})).unwrap_err();
        assert_matches!(err, WireError::MissingField { field, .. } if field == "blockType");
    }

    #[test]
    fn unknown_type_is_error() {
        let err = parse_wire_event(&json!({"type": "telemetry"})).unwrap_err();
        assert_matches!(err, WireError::UnknownType(t) if t == "telemetry");
    }

    #[test]
    fn missing_type_is_error() {
        let err = parse_wire_event(&json!({"timestamp": 1})).unwrap_err();
        assert_matches!(err, WireError::MissingType);
    }

    #[test]
    fn server_id_adopted_when_present() {
        let event = parse_wire_event(&json!({
            "type": "user",
            "id": "evt-42",
            "timestamp": 9,
            "text": "x",
        }))
        .unwrap();
        assert_eq!(event.server_id.as_deref(), Some("evt-42"));
    }

    #[test]
    fn batch_parse_drops_only_bad_events() {
        let events = parse_wire_events(&[
            json!({"type": "user", "timestamp": 1, "text": "a"}),
            json!({"type": "mystery"}),
            json!({"type": "user", "timestamp": 2, "text": "b"}),
        ]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, 1);
        assert_eq!(events[1].timestamp, 2);
    }
}
