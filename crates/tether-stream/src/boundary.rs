//! Session boundary detection.
//!
//! Consumes the normalized event history (post-reduction) and determines:
//!
//! - the active session identifier (server-issued id authoritative,
//!   synthetic `{instance}-{timestamp}` otherwise)
//! - whether a session has just ended (`TaskCompleted` terminal marker or
//!   superseded by the next boundary)
//! - associated task metadata (embedded title → directory lookup → raw id,
//!   else an externally supplied current-task hint)
//! - a keep/discard verdict for each closed session

use async_trait::async_trait;
use tracing::debug;

use tether_core::constants::{COMPLETION_SIGNALS, MIN_SESSION_EVENTS};
use tether_core::{ContentBlock, EventKind, NormalizedEvent, SessionId, TaskId};

/// Resolves task IDs to display titles. Lives outside this crate; the
/// detector only needs the lookup seam.
#[async_trait]
pub trait TaskDirectory: Send + Sync {
    /// Resolve a task's title, if the directory knows it.
    async fn title_for(&self, task_id: &TaskId) -> Option<String>;
}

/// A directory that knows no tasks.
pub struct EmptyTaskDirectory;

#[async_trait]
impl TaskDirectory for EmptyTaskDirectory {
    async fn title_for(&self, _task_id: &TaskId) -> Option<String> {
        None
    }
}

/// Externally supplied "current task" hint, used when a session has no
/// `TaskStarted` marker of its own.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskHint {
    /// The task ID.
    pub task_id: TaskId,
    /// Display title, if known.
    pub title: Option<String>,
}

/// Metadata extracted for one detected session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionInfo {
    /// Session identifier (server-issued or synthetic).
    pub id: SessionId,
    /// The detector's instance identifier.
    pub instance_id: String,
    /// Associated task, if any.
    pub task_id: Option<TaskId>,
    /// Resolved task title, if any.
    pub task_title: Option<String>,
    /// Boundary marker timestamp (wall clock when the marker's own
    /// timestamp is missing or zero).
    pub created_at: i64,
    /// Completion timestamp, set exactly once.
    pub completed_at: Option<i64>,
    /// Number of events in this session's segment.
    pub event_count: usize,
    /// Index into the analyzed slice where the segment begins.
    pub start_index: usize,
}

/// One session detected in the history.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedSession {
    /// Extracted metadata.
    pub info: SessionInfo,
    /// Whether this session has ended (terminal completion marker, or a
    /// later boundary superseded it).
    pub closed: bool,
    /// For closed sessions: whether it is worth keeping. Always true for
    /// the active session.
    pub keep: bool,
}

/// Result of analyzing an event history.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Analysis {
    /// Detected sessions in boundary order.
    pub sessions: Vec<DetectedSession>,
}

impl Analysis {
    /// The current session identifier: the last boundary seen.
    #[must_use]
    pub fn current_session_id(&self) -> Option<&SessionId> {
        self.sessions.last().map(|s| &s.info.id)
    }

    /// The active (not yet superseded, not yet completed) session.
    #[must_use]
    pub fn active(&self) -> Option<&DetectedSession> {
        self.sessions.last().filter(|s| !s.closed)
    }
}

/// Detects session boundaries in a normalized event history.
pub struct BoundaryDetector<D: TaskDirectory> {
    instance_id: String,
    min_events: usize,
    directory: D,
}

impl BoundaryDetector<EmptyTaskDirectory> {
    /// Detector with the default instance id and no task directory.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new("default", EmptyTaskDirectory)
    }
}

impl<D: TaskDirectory> BoundaryDetector<D> {
    /// Create a detector.
    pub fn new(instance_id: impl Into<String>, directory: D) -> Self {
        Self {
            instance_id: instance_id.into(),
            min_events: MIN_SESSION_EVENTS,
            directory,
        }
    }

    /// Override the minimum-event noise threshold.
    #[must_use]
    pub fn with_min_events(mut self, min_events: usize) -> Self {
        self.min_events = min_events;
        self
    }

    /// Analyze an event history.
    ///
    /// Events before the first boundary marker belong to no session and
    /// are ignored. `hint` supplies the externally known current task for
    /// sessions without their own `TaskStarted` marker.
    pub async fn analyze(
        &self,
        events: &[NormalizedEvent],
        hint: Option<&TaskHint>,
    ) -> Analysis {
        let mut boundaries: Vec<usize> = Vec::new();
        for (index, event) in events.iter().enumerate() {
            if event.is_boundary() {
                boundaries.push(index);
            }
        }

        let mut sessions = Vec::with_capacity(boundaries.len());
        for (position, &start_index) in boundaries.iter().enumerate() {
            let end_index = boundaries
                .get(position + 1)
                .copied()
                .unwrap_or(events.len());
            let segment = &events[start_index..end_index];
            let superseded = position + 1 < boundaries.len();
            sessions.push(self.analyze_segment(segment, start_index, superseded, hint).await);
        }

        Analysis { sessions }
    }

    async fn analyze_segment(
        &self,
        segment: &[NormalizedEvent],
        start_index: usize,
        superseded: bool,
        hint: Option<&TaskHint>,
    ) -> DetectedSession {
        let marker = &segment[0];
        // Resolved once so a wall-clock fallback gives the synthetic id and
        // `created_at` the same value.
        let created_at = trusted_timestamp(marker.timestamp);
        let id = self.session_id_for(marker, created_at);
        let completed_at = last_completion_timestamp(segment);
        let (task_id, task_title) = self.extract_task(segment, hint).await;

        let closed = superseded || completed_at.is_some();
        let info = SessionInfo {
            id,
            instance_id: self.instance_id.clone(),
            task_id,
            task_title,
            created_at,
            completed_at,
            event_count: segment.len(),
            start_index,
        };
        let keep = !closed || self.worth_keeping(&info, segment);

        if closed && !keep {
            debug!(session_id = %info.id, event_count = info.event_count, "session judged noise");
        }

        DetectedSession { info, closed, keep }
    }

    /// Server-issued id is authoritative; otherwise derive a synthetic id
    /// from the instance id and the marker's resolved timestamp.
    fn session_id_for(&self, marker: &NormalizedEvent, marker_timestamp: i64) -> SessionId {
        if let EventKind::SessionStart {
            server_session_id: Some(server_id),
        } = &marker.kind
        {
            return SessionId::from(server_id.clone());
        }
        SessionId::from(format!("{}-{}", self.instance_id, marker_timestamp))
    }

    /// Task extraction: embedded title, else directory lookup, else the
    /// raw id with no title; with no marker at all, fall back to the hint.
    async fn extract_task(
        &self,
        segment: &[NormalizedEvent],
        hint: Option<&TaskHint>,
    ) -> (Option<TaskId>, Option<String>) {
        for event in segment {
            if let EventKind::TaskStarted { task_id, title } = &event.kind {
                let resolved = match title {
                    Some(title) => Some(title.clone()),
                    None => self.directory.title_for(task_id).await,
                };
                return (Some(task_id.clone()), resolved);
            }
        }
        match hint {
            Some(hint) => (Some(hint.task_id.clone()), hint.title.clone()),
            None => (None, None),
        }
    }

    /// A closed session is noise when it has no task and its terminal
    /// content is a recognized "nothing to do" signal, or when it has
    /// fewer than the minimum number of events.
    fn worth_keeping(&self, info: &SessionInfo, segment: &[NormalizedEvent]) -> bool {
        if info.event_count < self.min_events {
            return false;
        }
        if info.task_id.is_none() && terminal_text(segment).is_some_and(is_completion_signal) {
            return false;
        }
        true
    }
}

/// Zero is a valid-looking but meaningless timestamp from malformed
/// upstream events; fall back to wall-clock time rather than trusting it.
fn trusted_timestamp(timestamp: i64) -> i64 {
    if timestamp == 0 {
        chrono::Utc::now().timestamp_millis()
    } else {
        timestamp
    }
}

/// Timestamp of the last completion marker in the segment, if any.
fn last_completion_timestamp(segment: &[NormalizedEvent]) -> Option<i64> {
    segment
        .iter()
        .rev()
        .find(|e| matches!(e.kind, EventKind::TaskCompleted { .. }))
        .map(|e| e.timestamp)
}

/// Text of the last event that carries renderable text.
fn terminal_text(segment: &[NormalizedEvent]) -> Option<String> {
    segment.iter().rev().find_map(|event| match &event.kind {
        EventKind::User { text } | EventKind::System { text } => Some(text.clone()),
        EventKind::Assistant { blocks } => {
            let text: Vec<&str> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            if text.is_empty() {
                None
            } else {
                Some(text.join("\n"))
            }
        }
        _ => None,
    })
}

/// Whether text matches a recognized "nothing to do" completion signal.
fn is_completion_signal(text: String) -> bool {
    COMPLETION_SIGNALS.iter().any(|signal| text.contains(signal))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
