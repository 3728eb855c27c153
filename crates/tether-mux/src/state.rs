//! Per-workspace state and the two state machines.
//!
//! The control state machine (`Idle → Running → Paused → …`) is driven by
//! dispatched commands; the link state machine (`Disconnected → Connecting
//! → Connected → Disconnected`) is driven by transport outcomes. Each link
//! state owns at most one timer: the reconnect timer exists only while
//! `Disconnected`, the heartbeat only while `Connected`, and readiness
//! polling only while `Connecting`. Connection attempts are numbered by an
//! epoch so outcomes from a superseded attempt are discarded.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_core::{ControlState, SessionId, SubscriberId};
use tether_protocol::{Command, MuxEvent};

use crate::traits::LinkSender;

/// Transport link state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No link. The reconnect timer, if any, lives here.
    Disconnected,
    /// Readiness polling or the handshake is in flight.
    Connecting,
    /// Link is open. The heartbeat lives here.
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Apply a command to the control state machine.
///
/// `Ok(Some(next))` is a valid transition, `Ok(None)` means the command
/// does not touch the control state, and `Err` carries the rejection
/// message for the typed error event.
pub fn apply_control(
    current: ControlState,
    command: &Command,
) -> std::result::Result<Option<ControlState>, String> {
    match (command, current) {
        (Command::Start { .. }, ControlState::Idle) => Ok(Some(ControlState::Running)),
        (Command::Pause, ControlState::Running) => Ok(Some(ControlState::Paused)),
        (Command::Resume, ControlState::Paused) => Ok(Some(ControlState::Running)),
        (Command::Stop, ControlState::Running | ControlState::Paused) => {
            Ok(Some(ControlState::Idle))
        }
        (
            Command::Start { .. } | Command::Pause | Command::Resume | Command::Stop,
            current,
        ) => Err(format!("{} is not valid while {current}", command.name())),
        _ => Ok(None),
    }
}

/// All state for one workspace, owned exclusively by the actor.
pub(crate) struct Workspace {
    /// Control state machine.
    pub control: ControlState,
    /// Link state machine.
    pub link: LinkState,
    /// Current session, server-issued or recovered.
    pub session: Option<SessionId>,
    /// Connection attempt number; stale attempt outcomes are discarded.
    pub epoch: u64,
    /// Write half of the open link (`Connected` only).
    pub sender: Option<Box<dyn LinkSender>>,
    /// Cancels the heartbeat task (`Connected` only).
    pub heartbeat: Option<CancellationToken>,
    /// Stop once the current task completes.
    pub stop_after_current: bool,
    /// Whether a message is currently streaming.
    pub streaming: bool,
    /// Texts of sent messages whose wire echo has not come back yet.
    pub pending_echoes: VecDeque<String>,
    /// Subscriber fan-out channels.
    pub subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<MuxEvent>>,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            control: ControlState::Idle,
            link: LinkState::Disconnected,
            session: None,
            epoch: 0,
            sender: None,
            heartbeat: None,
            stop_after_current: false,
            streaming: false,
            pending_echoes: VecDeque::new(),
            subscribers: HashMap::new(),
        }
    }

    /// Tear down everything owned by the `Connected` state.
    pub fn drop_link(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.cancel();
        }
        self.sender = None;
        self.link = LinkState::Disconnected;
    }

    /// Broadcast an event to every subscriber, pruning closed channels.
    pub fn broadcast(&mut self, event: &MuxEvent) {
        self.subscribers
            .retain(|_, sender| sender.send(event.clone()).is_ok());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
