//! Stream reduction: fragments in, renderable events out.
//!
//! [`reduce`] implements a two-pass algorithm over an ordered event
//! sequence:
//!
//! 1. **Range discovery**: pair up `message_start` / `message_stop`
//!    fragments into completed `[start, stop]` timestamp ranges; an
//!    unmatched start becomes the single in-progress marker (a later
//!    unmatched start supersedes it).
//! 2. **Assembly and dedup**: walk events in order. Fragments mutate the
//!    working message; non-fragments pass through unchanged, except a
//!    non-streamed "final form" assistant event that falls inside an echo
//!    window of a streamed range, which is suppressed as a duplicate.
//!
//! No input event is lost: every fragment is folded into either a
//! completed assistant event or the live [`StreamingMessage`].

use serde_json::Value;
use tracing::debug;

use tether_core::constants::{DEFAULT_ECHO_WINDOW_MS, DEFAULT_INFLIGHT_ECHO_WINDOW_MS};
use tether_core::{
    BlockStart, ContentBlock, EventKind, Fragment, NormalizedEvent, StreamingMessage,
};

/// Tunable echo-suppression windows.
#[derive(Clone, Copy, Debug)]
pub struct ReducerConfig {
    /// Echo window around a completed range's stop (inclusive).
    pub echo_window_ms: i64,
    /// Echo window at/after an in-progress range's start (inclusive).
    pub inflight_echo_window_ms: i64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            echo_window_ms: DEFAULT_ECHO_WINDOW_MS,
            inflight_echo_window_ms: DEFAULT_INFLIGHT_ECHO_WINDOW_MS,
        }
    }
}

/// Output of a reduction pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReduceResult {
    /// The full ordered renderable history.
    pub completed_events: Vec<NormalizedEvent>,
    /// The in-progress message, if a stream is open at the end of input.
    pub streaming_message: Option<StreamingMessage>,
}

/// Pass 1 output: streamed message ranges.
struct Ranges {
    /// Completed `[start, stop]` timestamp pairs.
    completed: Vec<(i64, i64)>,
    /// Start timestamp of the single unmatched `message_start`, if any.
    in_progress: Option<i64>,
}

/// A content block under assembly.
enum WorkingBlock {
    Text(String),
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        /// Raw accumulated input, parsed as JSON at finalization.
        input_buf: String,
    },
}

/// The at-most-one message under assembly.
struct WorkingMessage {
    timestamp: i64,
    blocks: Vec<WorkingBlock>,
}

/// Reduce an ordered event sequence into renderable history.
#[must_use]
pub fn reduce(events: &[NormalizedEvent], config: &ReducerConfig) -> ReduceResult {
    let ranges = discover_ranges(events);
    assemble(events, &ranges, config)
}

/// Pass 1: pair `message_start` / `message_stop` fragments.
fn discover_ranges(events: &[NormalizedEvent]) -> Ranges {
    let mut completed = Vec::new();
    let mut open: Option<i64> = None;

    for event in events {
        match &event.kind {
            EventKind::Fragment(Fragment::MessageStart) => {
                if let Some(superseded) = open.replace(event.timestamp) {
                    // A second unmatched start silently supersedes the first.
                    debug!(superseded, "unmatched message_start superseded");
                }
            }
            EventKind::Fragment(Fragment::MessageStop) => {
                if let Some(start) = open.take() {
                    completed.push((start, event.timestamp));
                }
            }
            _ => {}
        }
    }

    Ranges {
        completed,
        in_progress: open,
    }
}

/// Pass 2: assemble fragments and suppress echoes.
fn assemble(events: &[NormalizedEvent], ranges: &Ranges, config: &ReducerConfig) -> ReduceResult {
    let mut completed_events = Vec::new();
    let mut working: Option<WorkingMessage> = None;

    for event in events {
        match &event.kind {
            EventKind::Fragment(fragment) => {
                apply_fragment(event.timestamp, fragment, &mut working, &mut completed_events);
            }
            EventKind::Assistant { .. } if is_echo(event.timestamp, ranges, config) => {
                debug!(timestamp = event.timestamp, "suppressed final-form echo");
            }
            _ => completed_events.push(event.clone()),
        }
    }

    ReduceResult {
        completed_events,
        streaming_message: working.map(finalize_streaming),
    }
}

/// Whether a non-streamed assistant event is an echo of a streamed message.
///
/// True when its timestamp is within `echo_window_ms` of a completed
/// range's stop, or falls at/after an in-progress range's start within
/// `inflight_echo_window_ms` (covers echoes that arrive before the closing
/// fragment). Both comparisons are inclusive of equal timestamps.
fn is_echo(timestamp: i64, ranges: &Ranges, config: &ReducerConfig) -> bool {
    let near_completed = ranges
        .completed
        .iter()
        .any(|&(_, stop)| (timestamp - stop).abs() <= config.echo_window_ms);
    let near_in_progress = ranges.in_progress.is_some_and(|start| {
        timestamp >= start && timestamp - start <= config.inflight_echo_window_ms
    });
    near_completed || near_in_progress
}

/// Apply one fragment to the working message.
fn apply_fragment(
    timestamp: i64,
    fragment: &Fragment,
    working: &mut Option<WorkingMessage>,
    completed_events: &mut Vec<NormalizedEvent>,
) {
    match fragment {
        Fragment::MessageStart => {
            if working.is_some() {
                debug!(timestamp, "open working message superseded by new start");
            }
            *working = Some(WorkingMessage {
                timestamp,
                blocks: Vec::new(),
            });
        }
        Fragment::BlockStart(start) => {
            // A block arriving without a start opens a message implicitly,
            // so the fragment is not lost.
            let message = working.get_or_insert_with(|| WorkingMessage {
                timestamp,
                blocks: Vec::new(),
            });
            message.blocks.push(match start {
                BlockStart::Text { text } => WorkingBlock::Text(text.clone()),
                BlockStart::Thinking => WorkingBlock::Thinking(String::new()),
                BlockStart::ToolUse { id, name } => WorkingBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input_buf: String::new(),
                },
            });
        }
        Fragment::BlockDelta { text } => {
            let message = working.get_or_insert_with(|| WorkingMessage {
                timestamp,
                blocks: Vec::new(),
            });
            match message.blocks.last_mut() {
                Some(WorkingBlock::Text(buf) | WorkingBlock::Thinking(buf)) => {
                    buf.push_str(text);
                }
                Some(WorkingBlock::ToolUse { input_buf, .. }) => input_buf.push_str(text),
                None => {
                    // Delta without a block: treat as text so it survives.
                    message.blocks.push(WorkingBlock::Text(text.clone()));
                }
            }
        }
        Fragment::MessageStop => {
            if let Some(message) = working.take() {
                let blocks = message.blocks.into_iter().map(finalize_block).collect();
                completed_events.push(NormalizedEvent::new(
                    message.timestamp,
                    EventKind::Assistant { blocks },
                ));
            } else {
                debug!(timestamp, "message_stop with no open message ignored");
            }
        }
    }
}

/// Finalize one working block, parsing accumulated tool input as JSON.
///
/// A parse failure leaves the input empty rather than failing the message.
fn finalize_block(block: WorkingBlock) -> ContentBlock {
    match block {
        WorkingBlock::Text(text) => ContentBlock::Text { text },
        WorkingBlock::Thinking(thinking) => ContentBlock::Thinking { thinking },
        WorkingBlock::ToolUse {
            id,
            name,
            input_buf,
        } => {
            let input = serde_json::from_str(&input_buf).unwrap_or_else(|_| {
                if !input_buf.is_empty() {
                    debug!(tool_use_id = %id, "unparseable tool input left empty");
                }
                Value::Object(serde_json::Map::new())
            });
            ContentBlock::ToolUse { id, name, input }
        }
    }
}

/// Expose the open working message for live rendering.
fn finalize_streaming(message: WorkingMessage) -> StreamingMessage {
    StreamingMessage {
        timestamp: message.timestamp,
        blocks: message.blocks.into_iter().map(finalize_block).collect(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
