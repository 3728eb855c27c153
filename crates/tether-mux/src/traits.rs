//! Collaborator seams.
//!
//! The actor talks to the outside world through three traits: [`Transport`]
//! (how links are opened), [`PromptSource`] (where a new session's first
//! message comes from), and [`RecoveryCache`] (last-known session and
//! control state survive a host reload). Tests substitute channel-backed
//! fakes; production wires the `tokio-tungstenite` transport and the
//! sqlite-backed cache.

use async_trait::async_trait;

use tether_core::{ControlState, SessionId, WorkspaceId};

use crate::errors::Result;

/// Write half of an open link.
#[async_trait]
pub trait LinkSender: Send + Sync {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<()>;
    /// Close the link.
    async fn close(&mut self);
}

/// Read half of an open link.
#[async_trait]
pub trait LinkReceiver: Send {
    /// Receive the next text frame. `None` means the link closed.
    async fn recv(&mut self) -> Option<String>;
}

/// Both halves of a freshly opened link.
pub struct LinkPair {
    /// Write half.
    pub sender: Box<dyn LinkSender>,
    /// Read half.
    pub receiver: Box<dyn LinkReceiver>,
}

/// Opens links to the agent process.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Probe whether the server is accepting connections.
    async fn is_ready(&self, url: &str) -> bool;
    /// Open a link.
    async fn connect(&self, url: &str) -> Result<LinkPair>;
}

/// Supplies the initial prompt sent into a freshly created session.
#[async_trait]
pub trait PromptSource: Send + Sync + 'static {
    /// The workspace's initial prompt, if it has one.
    async fn initial_prompt(&self, workspace_id: &WorkspaceId) -> Option<String>;
}

/// A prompt source with no prompts.
pub struct NoPrompts;

#[async_trait]
impl PromptSource for NoPrompts {
    async fn initial_prompt(&self, _workspace_id: &WorkspaceId) -> Option<String> {
        None
    }
}

/// What the recovery cache remembers for a workspace: the session that was
/// active (if any) and the control state at the time of the save.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveredState {
    /// Last-known session, if one existed.
    pub session_id: Option<SessionId>,
    /// Control state at the last save.
    pub control: ControlState,
}

/// Remembers each workspace's last-known session and control state across
/// host reloads.
#[async_trait]
pub trait RecoveryCache: Send + Sync + 'static {
    /// Last-known state for the workspace.
    async fn load(&self, workspace_id: &WorkspaceId) -> Option<RecoveredState>;
    /// Remember the workspace's current state.
    async fn save(&self, workspace_id: &WorkspaceId, state: &RecoveredState);
    /// Forget the workspace's state.
    async fn clear(&self, workspace_id: &WorkspaceId);
}
