//! The multiplexer actor.
//!
//! One task owns the whole per-workspace registry; hosts interact through
//! the cloneable [`MuxHandle`], and every transport task (connector,
//! reader, heartbeat, reconnect timer) reports back over the same message
//! channel. Outcomes from a superseded connection attempt carry a stale
//! epoch and are discarded on arrival, so no lock ever guards workspace
//! state.
//!
//! Per-workspace event order is transport-receipt order: the actor
//! broadcasts each inbound event to every subscriber before touching the
//! next message.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::{ControlState, EventKind, Fragment, SessionId, SubscriberId, WorkspaceId};
use tether_protocol::parse::{parse_wire_event, parse_wire_events};
use tether_protocol::{ClientCommand, Command, ErrorEvent, MuxEvent, ServerMessage};

use crate::config::MuxConfig;
use crate::errors::{MuxError, Result};
use crate::state::{LinkState, Workspace, apply_control};
use crate::traits::{LinkPair, LinkSender, PromptSource, RecoveredState, RecoveryCache, Transport};

enum ActorMsg {
    Subscribe {
        workspace_id: WorkspaceId,
        sender: mpsc::UnboundedSender<MuxEvent>,
        reply: oneshot::Sender<SubscriberId>,
    },
    Unsubscribe {
        workspace_id: WorkspaceId,
        subscriber_id: SubscriberId,
    },
    Dispatch {
        workspace_id: WorkspaceId,
        command: Command,
    },
    LinkOpened {
        workspace_id: WorkspaceId,
        epoch: u64,
        sender: Box<dyn LinkSender>,
    },
    LinkFailed {
        workspace_id: WorkspaceId,
        epoch: u64,
        error: String,
    },
    LinkClosed {
        workspace_id: WorkspaceId,
        epoch: u64,
    },
    ReadyTimeout {
        workspace_id: WorkspaceId,
        epoch: u64,
    },
    ReconnectDue {
        workspace_id: WorkspaceId,
        epoch: u64,
    },
    HeartbeatDue {
        workspace_id: WorkspaceId,
        epoch: u64,
    },
    Inbound {
        workspace_id: WorkspaceId,
        epoch: u64,
        text: String,
    },
}

/// One subscriber's view of a workspace.
pub struct Subscription {
    /// Token for unsubscribing.
    pub id: SubscriberId,
    /// The typed event stream, in transport-receipt order.
    pub events: mpsc::UnboundedReceiver<MuxEvent>,
}

/// Cloneable handle to the actor task.
#[derive(Clone)]
pub struct MuxHandle {
    tx: mpsc::UnboundedSender<ActorMsg>,
}

impl MuxHandle {
    /// Subscribe to a workspace.
    ///
    /// The first subscriber restores the workspace's recovered session and
    /// control state and opens the transport; every subscriber immediately
    /// receives a state replay (`StateChange` and, when a session is known,
    /// `SessionRestored`).
    pub async fn subscribe(&self, workspace_id: WorkspaceId) -> Result<Subscription> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ActorMsg::Subscribe {
                workspace_id,
                sender: event_tx,
                reply: reply_tx,
            })
            .map_err(|_| MuxError::Closed)?;
        let id = reply_rx.await.map_err(|_| MuxError::Closed)?;
        Ok(Subscription {
            id,
            events: event_rx,
        })
    }

    /// Unsubscribe. When the last subscriber leaves, the workspace's link
    /// closes and its state is dropped.
    pub fn unsubscribe(&self, workspace_id: WorkspaceId, subscriber_id: SubscriberId) -> Result<()> {
        self.tx
            .send(ActorMsg::Unsubscribe {
                workspace_id,
                subscriber_id,
            })
            .map_err(|_| MuxError::Closed)
    }

    /// Dispatch a control command. Invalid transitions come back as typed
    /// `CommandRejected` error events on the stream, never as an `Err`.
    pub fn dispatch(&self, workspace_id: WorkspaceId, command: Command) -> Result<()> {
        self.tx
            .send(ActorMsg::Dispatch {
                workspace_id,
                command,
            })
            .map_err(|_| MuxError::Closed)
    }
}

/// Spawns the actor task.
pub struct Multiplexer;

impl Multiplexer {
    /// Spawn the actor and return a handle to it.
    pub fn spawn(
        config: MuxConfig,
        transport: Arc<dyn Transport>,
        prompts: Arc<dyn PromptSource>,
        recovery: Arc<dyn RecoveryCache>,
    ) -> MuxHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            config,
            transport,
            prompts,
            recovery,
            workspaces: HashMap::new(),
            tx: tx.clone(),
        };
        let _ = tokio::spawn(actor.run(rx));
        MuxHandle { tx }
    }
}

struct Actor {
    config: MuxConfig,
    transport: Arc<dyn Transport>,
    prompts: Arc<dyn PromptSource>,
    recovery: Arc<dyn RecoveryCache>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    tx: mpsc::UnboundedSender<ActorMsg>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActorMsg>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg).await;
        }
        debug!("multiplexer actor stopped");
    }

    async fn handle(&mut self, msg: ActorMsg) {
        match msg {
            ActorMsg::Subscribe {
                workspace_id,
                sender,
                reply,
            } => self.on_subscribe(workspace_id, sender, reply).await,
            ActorMsg::Unsubscribe {
                workspace_id,
                subscriber_id,
            } => self.on_unsubscribe(workspace_id, subscriber_id).await,
            ActorMsg::Dispatch {
                workspace_id,
                command,
            } => self.on_dispatch(workspace_id, command).await,
            ActorMsg::LinkOpened {
                workspace_id,
                epoch,
                sender,
            } => self.on_link_opened(workspace_id, epoch, sender).await,
            ActorMsg::LinkFailed {
                workspace_id,
                epoch,
                error,
            } => {
                if self.epoch_current(&workspace_id, epoch) {
                    self.on_link_failure(&workspace_id, &error);
                }
            }
            ActorMsg::LinkClosed {
                workspace_id,
                epoch,
            } => self.on_link_closed(workspace_id, epoch),
            ActorMsg::ReadyTimeout {
                workspace_id,
                epoch,
            } => self.on_ready_timeout(workspace_id, epoch),
            ActorMsg::ReconnectDue {
                workspace_id,
                epoch,
            } => self.on_reconnect_due(workspace_id, epoch),
            ActorMsg::HeartbeatDue {
                workspace_id,
                epoch,
            } => {
                if self.epoch_current(&workspace_id, epoch) {
                    self.send_wire(&workspace_id, &ClientCommand::Ping).await;
                }
            }
            ActorMsg::Inbound {
                workspace_id,
                epoch,
                text,
            } => self.on_inbound(workspace_id, epoch, text).await,
        }
    }

    fn epoch_current(&self, workspace_id: &WorkspaceId, epoch: u64) -> bool {
        self.workspaces
            .get(workspace_id)
            .is_some_and(|ws| ws.epoch == epoch)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subscribers
    // ─────────────────────────────────────────────────────────────────────

    async fn on_subscribe(
        &mut self,
        workspace_id: WorkspaceId,
        sender: mpsc::UnboundedSender<MuxEvent>,
        reply: oneshot::Sender<SubscriberId>,
    ) {
        let first = !self.workspaces.contains_key(&workspace_id);
        let recovered = if first {
            self.recovery.load(&workspace_id).await
        } else {
            None
        };

        let id = SubscriberId::new();
        {
            let ws = self
                .workspaces
                .entry(workspace_id.clone())
                .or_insert_with(Workspace::new);
            if let Some(recovered) = recovered {
                ws.session = recovered.session_id;
                ws.control = recovered.control;
            }

            // State replay to the new subscriber only.
            let _ = sender.send(MuxEvent::StateChange { state: ws.control });
            if let Some(session_id) = &ws.session {
                let _ = sender.send(MuxEvent::SessionRestored {
                    session_id: session_id.clone(),
                });
            }
            let _ = ws.subscribers.insert(id.clone(), sender);
            debug!(workspace_id = %workspace_id, subscribers = ws.subscribers.len(), "subscriber joined");
        }

        if first {
            self.begin_connect(&workspace_id);
        }
        let _ = reply.send(id);
    }

    async fn on_unsubscribe(&mut self, workspace_id: WorkspaceId, subscriber_id: SubscriberId) {
        let empty = {
            let Some(ws) = self.workspaces.get_mut(&workspace_id) else {
                return;
            };
            let _ = ws.subscribers.remove(&subscriber_id);
            ws.subscribers.is_empty()
        };
        if empty {
            info!(workspace_id = %workspace_id, "last subscriber left, closing workspace");
            if let Some(mut ws) = self.workspaces.remove(&workspace_id) {
                if let Some(heartbeat) = ws.heartbeat.take() {
                    heartbeat.cancel();
                }
                if let Some(mut sender) = ws.sender.take() {
                    sender.close().await;
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    async fn on_dispatch(&mut self, workspace_id: WorkspaceId, command: Command) {
        let state_changed = {
            let Some(ws) = self.workspaces.get_mut(&workspace_id) else {
                debug!(workspace_id = %workspace_id, command = command.name(), "dispatch to unknown workspace");
                return;
            };
            match apply_control(ws.control, &command) {
                Err(message) => {
                    warn!(workspace_id = %workspace_id, command = command.name(), "command rejected");
                    ws.broadcast(&MuxEvent::Error {
                        error: ErrorEvent::rejected(message),
                    });
                    return;
                }
                Ok(Some(next)) => {
                    ws.control = next;
                    ws.broadcast(&MuxEvent::StateChange { state: next });
                    true
                }
                Ok(None) => false,
            }
        };
        if state_changed {
            self.save_recovery_state(&workspace_id).await;
        }

        match command {
            Command::Start { resume } => self.handle_start(&workspace_id, resume).await,
            Command::Stop => self.clear_stop_after_current(&workspace_id),
            Command::Pause | Command::Resume => {}
            Command::SendMessage { text } => self.handle_send_message(&workspace_id, text).await,
            Command::StopAfterCurrent => self.set_stop_after_current(&workspace_id, true),
            Command::CancelStopAfterCurrent => self.set_stop_after_current(&workspace_id, false),
        }
    }

    async fn handle_start(&mut self, workspace_id: &WorkspaceId, resume: Option<SessionId>) {
        if let Some(session_id) = resume {
            if let Some(ws) = self.workspaces.get_mut(workspace_id) {
                ws.session = Some(session_id);
            }
            self.save_recovery_state(workspace_id).await;
        }
        match self.workspaces.get(workspace_id).map(|ws| ws.link) {
            Some(LinkState::Connected) => self.open_session(workspace_id).await,
            Some(LinkState::Disconnected) => self.begin_connect(workspace_id),
            // Connecting: the session opens once the link comes up.
            _ => {}
        }
    }

    async fn handle_send_message(&mut self, workspace_id: &WorkspaceId, text: String) {
        let command = {
            let Some(ws) = self.workspaces.get_mut(workspace_id) else {
                return;
            };
            let Some(session_id) = ws.session.clone() else {
                ws.broadcast(&MuxEvent::Error {
                    error: ErrorEvent::rejected("send_message requires an active session"),
                });
                return;
            };
            if ws.link != LinkState::Connected {
                ws.broadcast(&MuxEvent::Error {
                    error: ErrorEvent::rejected("send_message requires a connected link"),
                });
                return;
            }
            ws.pending_echoes.push_back(text.clone());
            ClientCommand::Message { session_id, text }
        };
        self.send_wire(workspace_id, &command).await;
    }

    fn set_stop_after_current(&mut self, workspace_id: &WorkspaceId, enabled: bool) {
        let Some(ws) = self.workspaces.get_mut(workspace_id) else {
            return;
        };
        if enabled && ws.control != ControlState::Running {
            ws.broadcast(&MuxEvent::Error {
                error: ErrorEvent::rejected("stop_after_current requires a running agent"),
            });
            return;
        }
        if ws.stop_after_current != enabled {
            ws.stop_after_current = enabled;
            ws.broadcast(&MuxEvent::StopAfterCurrentChange { enabled });
        }
    }

    fn clear_stop_after_current(&mut self, workspace_id: &WorkspaceId) {
        let Some(ws) = self.workspaces.get_mut(workspace_id) else {
            return;
        };
        if ws.stop_after_current {
            ws.stop_after_current = false;
            ws.broadcast(&MuxEvent::StopAfterCurrentChange { enabled: false });
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Link lifecycle
    // ─────────────────────────────────────────────────────────────────────

    fn begin_connect(&mut self, workspace_id: &WorkspaceId) {
        let Some(ws) = self.workspaces.get_mut(workspace_id) else {
            return;
        };
        if ws.link != LinkState::Disconnected {
            return;
        }
        ws.epoch += 1;
        ws.link = LinkState::Connecting;
        let epoch = ws.epoch;
        debug!(workspace_id = %workspace_id, epoch, "connecting");

        let transport = Arc::clone(&self.transport);
        let url = self.config.server_url.clone();
        let poll = self.config.ready_poll_interval;
        let budget = self.config.ready_timeout;
        let tx = self.tx.clone();
        let workspace_id = workspace_id.clone();
        let _ = tokio::spawn(async move {
            let deadline = Instant::now() + budget;
            loop {
                if transport.is_ready(&url).await {
                    break;
                }
                if Instant::now() >= deadline {
                    let _ = tx.send(ActorMsg::ReadyTimeout { workspace_id, epoch });
                    return;
                }
                sleep(poll).await;
            }
            match transport.connect(&url).await {
                Ok(LinkPair {
                    sender,
                    mut receiver,
                }) => {
                    let reader_tx = tx.clone();
                    let reader_ws = workspace_id.clone();
                    let _ = tx.send(ActorMsg::LinkOpened {
                        workspace_id,
                        epoch,
                        sender,
                    });
                    let _ = tokio::spawn(async move {
                        while let Some(text) = receiver.recv().await {
                            let sent = reader_tx.send(ActorMsg::Inbound {
                                workspace_id: reader_ws.clone(),
                                epoch,
                                text,
                            });
                            if sent.is_err() {
                                return;
                            }
                        }
                        let _ = reader_tx.send(ActorMsg::LinkClosed {
                            workspace_id: reader_ws,
                            epoch,
                        });
                    });
                }
                Err(e) => {
                    let _ = tx.send(ActorMsg::LinkFailed {
                        workspace_id,
                        epoch,
                        error: e.to_string(),
                    });
                }
            }
        });
    }

    async fn on_link_opened(
        &mut self,
        workspace_id: WorkspaceId,
        epoch: u64,
        sender: Box<dyn LinkSender>,
    ) {
        let open_session = {
            let Some(ws) = self.workspaces.get_mut(&workspace_id) else {
                return;
            };
            if epoch != ws.epoch {
                return;
            }
            ws.sender = Some(sender);
            ws.link = LinkState::Connected;
            ws.broadcast(&MuxEvent::Connected);
            info!(workspace_id = %workspace_id, "link connected");

            let token = CancellationToken::new();
            ws.heartbeat = Some(token.clone());
            let tx = self.tx.clone();
            let heartbeat_ws = workspace_id.clone();
            let period = self.config.heartbeat_interval;
            let _ = tokio::spawn(async move {
                let mut ticker = interval(period);
                // The first tick fires immediately.
                let _ = ticker.tick().await;
                loop {
                    tokio::select! {
                        () = token.cancelled() => return,
                        _ = ticker.tick() => {
                            let sent = tx.send(ActorMsg::HeartbeatDue {
                                workspace_id: heartbeat_ws.clone(),
                                epoch,
                            });
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            });

            ws.control == ControlState::Running
        };

        if open_session {
            self.open_session(&workspace_id).await;
        }
    }

    /// Resume the known session or ask for a new one.
    async fn open_session(&mut self, workspace_id: &WorkspaceId) {
        let command = match self.workspaces.get(workspace_id).and_then(|ws| ws.session.clone()) {
            Some(session_id) => ClientCommand::Reconnect { session_id },
            None => ClientCommand::CreateSession {
                workspace_id: workspace_id.clone(),
            },
        };
        self.send_wire(workspace_id, &command).await;
    }

    async fn send_wire(&mut self, workspace_id: &WorkspaceId, command: &ClientCommand) {
        let text = match command.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode command");
                return;
            }
        };
        let failure = {
            let Some(ws) = self.workspaces.get_mut(workspace_id) else {
                return;
            };
            match ws.sender.as_mut() {
                Some(sender) => sender.send(text).await.err().map(|e| e.to_string()),
                None => {
                    debug!(workspace_id = %workspace_id, "dropping command, link not connected");
                    None
                }
            }
        };
        if let Some(error) = failure {
            self.on_link_failure(workspace_id, &error);
        }
    }

    fn on_link_failure(&mut self, workspace_id: &WorkspaceId, error: &str) {
        {
            let Some(ws) = self.workspaces.get_mut(workspace_id) else {
                return;
            };
            warn!(workspace_id = %workspace_id, error, "link failed");
            ws.broadcast(&MuxEvent::Error {
                error: ErrorEvent::transport(error),
            });
            let was_connected = ws.link == LinkState::Connected;
            ws.drop_link();
            if was_connected {
                ws.broadcast(&MuxEvent::Disconnected);
            }
        }
        self.schedule_reconnect(workspace_id);
    }

    fn on_link_closed(&mut self, workspace_id: WorkspaceId, epoch: u64) {
        {
            let Some(ws) = self.workspaces.get_mut(&workspace_id) else {
                return;
            };
            if epoch != ws.epoch || ws.link != LinkState::Connected {
                return;
            }
            info!(workspace_id = %workspace_id, "link closed unexpectedly");
            ws.drop_link();
            ws.broadcast(&MuxEvent::Disconnected);
        }
        self.schedule_reconnect(&workspace_id);
    }

    fn on_ready_timeout(&mut self, workspace_id: WorkspaceId, epoch: u64) {
        let Some(ws) = self.workspaces.get_mut(&workspace_id) else {
            return;
        };
        if epoch != ws.epoch || ws.link != LinkState::Connecting {
            return;
        }
        // Give up silently; the user retries with another start.
        debug!(workspace_id = %workspace_id, "readiness polling timed out");
        ws.link = LinkState::Disconnected;
    }

    /// Exactly one reconnect attempt after a fixed delay.
    fn schedule_reconnect(&mut self, workspace_id: &WorkspaceId) {
        let Some(ws) = self.workspaces.get(workspace_id) else {
            return;
        };
        if ws.subscribers.is_empty() || ws.link != LinkState::Disconnected {
            return;
        }
        let epoch = ws.epoch;
        let delay = self.config.reconnect_delay;
        let tx = self.tx.clone();
        let workspace_id = workspace_id.clone();
        debug!(workspace_id = %workspace_id, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        let _ = tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(ActorMsg::ReconnectDue { workspace_id, epoch });
        });
    }

    fn on_reconnect_due(&mut self, workspace_id: WorkspaceId, epoch: u64) {
        let current = self.workspaces.get(&workspace_id).is_some_and(|ws| {
            ws.epoch == epoch && ws.link == LinkState::Disconnected && !ws.subscribers.is_empty()
        });
        if current {
            self.begin_connect(&workspace_id);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound messages
    // ─────────────────────────────────────────────────────────────────────

    async fn on_inbound(&mut self, workspace_id: WorkspaceId, epoch: u64, text: String) {
        if !self.epoch_current(&workspace_id, epoch) {
            return;
        }
        let message = match ServerMessage::decode(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "undecodable server message");
                if let Some(ws) = self.workspaces.get_mut(&workspace_id) {
                    ws.broadcast(&MuxEvent::Error {
                        error: ErrorEvent::parse(e.to_string()),
                    });
                }
                return;
            }
        };

        match message {
            ServerMessage::Pong => debug!(workspace_id = %workspace_id, "pong"),
            ServerMessage::Status { message } => {
                debug!(workspace_id = %workspace_id, status = %message, "server status");
            }
            ServerMessage::Error { message } => {
                if let Some(ws) = self.workspaces.get_mut(&workspace_id) {
                    ws.broadcast(&MuxEvent::Error {
                        error: ErrorEvent::transport(message),
                    });
                }
            }
            ServerMessage::SessionCreated { session_id } => {
                self.adopt_session(&workspace_id, SessionId::from(session_id), true)
                    .await;
            }
            ServerMessage::PendingEvents { events } => {
                let parsed = parse_wire_events(&events);
                if let Some(ws) = self.workspaces.get_mut(&workspace_id) {
                    debug!(workspace_id = %workspace_id, count = parsed.len(), "pending events");
                    ws.broadcast(&MuxEvent::PendingEvents { events: parsed });
                }
            }
            ServerMessage::Event { event } => self.on_event(&workspace_id, &event).await,
        }
    }

    /// Snapshot the workspace's session and control state into the
    /// recovery cache.
    async fn save_recovery_state(&self, workspace_id: &WorkspaceId) {
        let Some(ws) = self.workspaces.get(workspace_id) else {
            return;
        };
        let state = RecoveredState {
            session_id: ws.session.clone(),
            control: ws.control,
        };
        self.recovery.save(workspace_id, &state).await;
    }

    async fn adopt_session(
        &mut self,
        workspace_id: &WorkspaceId,
        session_id: SessionId,
        announce: bool,
    ) {
        let running = {
            let Some(ws) = self.workspaces.get_mut(workspace_id) else {
                return;
            };
            ws.session = Some(session_id.clone());
            if announce {
                ws.broadcast(&MuxEvent::SessionCreated {
                    session_id: session_id.clone(),
                });
            }
            ws.control == ControlState::Running
        };
        self.save_recovery_state(workspace_id).await;

        // A freshly created session gets the workspace's initial prompt as
        // its first message.
        if announce && running {
            if let Some(prompt) = self.prompts.initial_prompt(workspace_id).await {
                if let Some(ws) = self.workspaces.get_mut(workspace_id) {
                    ws.pending_echoes.push_back(prompt.clone());
                }
                self.send_wire(
                    workspace_id,
                    &ClientCommand::Message {
                        session_id,
                        text: prompt,
                    },
                )
                .await;
            }
        }
    }

    async fn on_event(&mut self, workspace_id: &WorkspaceId, raw: &Value) {
        let event = match parse_wire_event(raw) {
            Ok(event) => event,
            Err(e) => {
                debug!(workspace_id = %workspace_id, error = %e, "dropping unparseable event");
                return;
            }
        };

        // Drop the wire echo of a message this client sent itself.
        if let EventKind::User { text } = &event.kind {
            if let Some(ws) = self.workspaces.get_mut(workspace_id) {
                if ws.pending_echoes.front() == Some(text) {
                    let _ = ws.pending_echoes.pop_front();
                    debug!(workspace_id = %workspace_id, "dropping self-originated user echo");
                    return;
                }
            }
        }

        // Init markers can carry the authoritative server session id.
        if let EventKind::SessionStart {
            server_session_id: Some(id),
        } = &event.kind
        {
            let known = self
                .workspaces
                .get(workspace_id)
                .and_then(|ws| ws.session.as_ref())
                .is_some_and(|session| session.as_str() == id.as_str());
            if !known {
                self.adopt_session(workspace_id, SessionId::from(id.clone()), false)
                    .await;
            }
        }

        let streaming_change = match &event.kind {
            EventKind::Fragment(Fragment::MessageStart) => Some(true),
            EventKind::Fragment(Fragment::MessageStop) => Some(false),
            _ => None,
        };
        let completes_task = matches!(event.kind, EventKind::TaskCompleted { .. });

        let went_idle = {
            let Some(ws) = self.workspaces.get_mut(workspace_id) else {
                return;
            };
            if let Some(active) = streaming_change {
                if ws.streaming != active {
                    ws.streaming = active;
                    ws.broadcast(&MuxEvent::StreamingState { active });
                }
            }
            ws.broadcast(&MuxEvent::Event { event });

            if completes_task && ws.stop_after_current {
                ws.stop_after_current = false;
                ws.control = ControlState::Idle;
                ws.broadcast(&MuxEvent::StopAfterCurrentChange { enabled: false });
                ws.broadcast(&MuxEvent::StateChange {
                    state: ControlState::Idle,
                });
                true
            } else {
                false
            }
        };
        if went_idle {
            self.save_recovery_state(workspace_id).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::recovery::MemoryRecoveryCache;
    use crate::traits::{LinkReceiver, NoPrompts};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tether_protocol::ErrorKind;

    // ── Fake transport ───────────────────────────────────────────────

    struct FakeTransport {
        ready: AtomicBool,
        links: Mutex<VecDeque<LinkPair>>,
        connects: AtomicUsize,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                ready: AtomicBool::new(true),
                links: Mutex::new(VecDeque::new()),
                connects: AtomicUsize::new(0),
            }
        }

        fn push_link(&self) -> ServerEnd {
            let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
            let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
            self.links.lock().push_back(LinkPair {
                sender: Box::new(FakeSender { tx: from_client_tx }),
                receiver: Box::new(FakeReceiver { rx: to_client_rx }),
            });
            ServerEnd {
                to_client: Some(to_client_tx),
                from_client: from_client_rx,
            }
        }

        fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn is_ready(&self, _url: &str) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn connect(&self, _url: &str) -> Result<LinkPair> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.links
                .lock()
                .pop_front()
                .ok_or_else(|| MuxError::Transport("no link available".into()))
        }
    }

    struct FakeSender {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl LinkSender for FakeSender {
        async fn send(&mut self, text: String) -> Result<()> {
            self.tx
                .send(text)
                .map_err(|_| MuxError::Transport("link closed".into()))
        }

        async fn close(&mut self) {}
    }

    struct FakeReceiver {
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl LinkReceiver for FakeReceiver {
        async fn recv(&mut self) -> Option<String> {
            self.rx.recv().await
        }
    }

    struct ServerEnd {
        to_client: Option<mpsc::UnboundedSender<String>>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    impl ServerEnd {
        fn send_json(&self, value: serde_json::Value) {
            if let Some(tx) = &self.to_client {
                tx.send(value.to_string()).unwrap();
            }
        }

        async fn next_sent(&mut self) -> serde_json::Value {
            serde_json::from_str(&self.from_client.recv().await.unwrap()).unwrap()
        }

        fn disconnect(&mut self) {
            self.to_client = None;
        }
    }

    struct FixedPrompt(&'static str);

    #[async_trait]
    impl PromptSource for FixedPrompt {
        async fn initial_prompt(&self, _workspace_id: &WorkspaceId) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    // ── Harness ──────────────────────────────────────────────────────

    struct Harness {
        handle: MuxHandle,
        transport: Arc<FakeTransport>,
        recovery: Arc<MemoryRecoveryCache>,
    }

    fn spawn_mux(prompts: Arc<dyn PromptSource>) -> Harness {
        let transport = Arc::new(FakeTransport::new());
        let recovery = Arc::new(MemoryRecoveryCache::new());
        let handle = Multiplexer::spawn(
            MuxConfig {
                server_url: "ws://test".to_string(),
                ..MuxConfig::default()
            },
            transport.clone(),
            prompts,
            recovery.clone(),
        );
        Harness {
            handle,
            transport,
            recovery,
        }
    }

    fn ws_id() -> WorkspaceId {
        WorkspaceId::from("ws-1")
    }

    async fn next(sub: &mut Subscription) -> MuxEvent {
        sub.events.recv().await.unwrap()
    }

    /// Yield until queued actor work settles, then collect without blocking.
    async fn settle(sub: &mut Subscription) -> Vec<MuxEvent> {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        let mut events = Vec::new();
        while let Ok(event) = sub.events.try_recv() {
            events.push(event);
        }
        events
    }

    // ── Subscribe / connect ──────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn subscribe_replays_state_then_connects() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let _server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::StateChange {
                state: ControlState::Idle
            }
        );
        assert_eq!(next(&mut sub).await, MuxEvent::Connected);
        assert_eq!(mux.transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_subscriber_shares_the_connection() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let mut server = mux.transport.push_link();

        let mut first = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut first).await; // StateChange
        next(&mut first).await; // Connected

        mux.handle
            .dispatch(ws_id(), Command::Start { resume: None })
            .unwrap();
        assert_eq!(server.next_sent().await["type"], "create_session");
        server.send_json(json!({"type": "session_created", "sessionId": "abc"}));
        assert_matches!(next(&mut first).await, MuxEvent::StateChange { .. });
        assert_matches!(next(&mut first).await, MuxEvent::SessionCreated { .. });

        // A second tab: state replay, no second connection.
        let mut second = mux.handle.subscribe(ws_id()).await.unwrap();
        assert_eq!(
            next(&mut second).await,
            MuxEvent::StateChange {
                state: ControlState::Running
            }
        );
        assert_eq!(
            next(&mut second).await,
            MuxEvent::SessionRestored {
                session_id: SessionId::from("abc")
            }
        );
        assert_eq!(mux.transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_timeout_gives_up_silently() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        mux.transport.ready.store(false, Ordering::SeqCst);

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        assert_matches!(next(&mut sub).await, MuxEvent::StateChange { .. });

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(mux.transport.connect_count(), 0);
        // No error, no connected: polling just gave up.
        assert!(settle(&mut sub).await.is_empty());
    }

    // ── Session lifecycle ────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn start_creates_session_and_sends_initial_prompt() {
        let mux = spawn_mux(Arc::new(FixedPrompt("build the thing")));
        let mut server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await; // StateChange
        next(&mut sub).await; // Connected

        mux.handle
            .dispatch(ws_id(), Command::Start { resume: None })
            .unwrap();
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::StateChange {
                state: ControlState::Running
            }
        );

        let sent = server.next_sent().await;
        assert_eq!(sent["type"], "create_session");
        assert_eq!(sent["workspaceId"], "ws-1");

        server.send_json(json!({"type": "session_created", "sessionId": "abc"}));
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::SessionCreated {
                session_id: SessionId::from("abc")
            }
        );

        let message = server.next_sent().await;
        assert_eq!(message["type"], "message");
        assert_eq!(message["sessionId"], "abc");
        assert_eq!(message["text"], "build the thing");

        let saved = mux.recovery.load(&ws_id()).await.unwrap();
        assert_eq!(saved.session_id.unwrap().as_str(), "abc");
        assert_eq!(saved.control, ControlState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn start_resumes_recovered_session() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        mux.recovery
            .save(
                &ws_id(),
                &RecoveredState {
                    session_id: Some(SessionId::from("old-1")),
                    control: ControlState::Idle,
                },
            )
            .await;
        let mut server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        assert_matches!(next(&mut sub).await, MuxEvent::StateChange { .. });
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::SessionRestored {
                session_id: SessionId::from("old-1")
            }
        );
        next(&mut sub).await; // Connected

        mux.handle
            .dispatch(ws_id(), Command::Start { resume: None })
            .unwrap();
        let sent = server.next_sent().await;
        assert_eq!(sent["type"], "reconnect");
        assert_eq!(sent["sessionId"], "old-1");
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_running_state_replays_and_reconnects() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        mux.recovery
            .save(
                &ws_id(),
                &RecoveredState {
                    session_id: Some(SessionId::from("old-1")),
                    control: ControlState::Running,
                },
            )
            .await;
        let mut server = mux.transport.push_link();

        // A host reload mid-run: the first subscriber sees the running
        // state and the session without dispatching anything.
        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::StateChange {
                state: ControlState::Running
            }
        );
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::SessionRestored {
                session_id: SessionId::from("old-1")
            }
        );
        assert_eq!(next(&mut sub).await, MuxEvent::Connected);

        // Running at link-open resumes the session unprompted.
        let sent = server.next_sent().await;
        assert_eq!(sent["type"], "reconnect");
        assert_eq!(sent["sessionId"], "old-1");
    }

    #[tokio::test(start_paused = true)]
    async fn control_transitions_are_saved_for_recovery() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let mut server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await; // Connected

        mux.handle
            .dispatch(ws_id(), Command::Start { resume: None })
            .unwrap();
        next(&mut sub).await; // Running
        server.next_sent().await; // create_session
        assert_eq!(
            mux.recovery.load(&ws_id()).await.unwrap().control,
            ControlState::Running
        );

        mux.handle.dispatch(ws_id(), Command::Pause).unwrap();
        next(&mut sub).await; // Paused
        assert_eq!(
            mux.recovery.load(&ws_id()).await.unwrap().control,
            ControlState::Paused
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_message_without_session_is_rejected() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let _server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await; // Connected

        mux.handle
            .dispatch(
                ws_id(),
                Command::SendMessage {
                    text: "hello".into(),
                },
            )
            .unwrap();
        assert_matches!(
            next(&mut sub).await,
            MuxEvent::Error { error } if error.kind == ErrorKind::CommandRejected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn self_originated_user_echo_is_dropped() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let mut server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await; // Connected

        mux.handle
            .dispatch(ws_id(), Command::Start { resume: None })
            .unwrap();
        next(&mut sub).await; // StateChange Running
        server.next_sent().await; // create_session
        server.send_json(json!({"type": "session_created", "sessionId": "abc"}));
        next(&mut sub).await; // SessionCreated

        mux.handle
            .dispatch(ws_id(), Command::SendMessage { text: "hi".into() })
            .unwrap();
        assert_eq!(server.next_sent().await["type"], "message");

        // The wire echo of our own message is swallowed; a different user
        // event still comes through.
        server.send_json(json!({"type": "event", "event": {"type": "user", "timestamp": 5, "text": "hi"}}));
        server.send_json(json!({"type": "event", "event": {"type": "user", "timestamp": 6, "text": "from another tab"}}));

        assert_matches!(
            next(&mut sub).await,
            MuxEvent::Event { event } if event.kind == EventKind::User { text: "from another tab".into() }
        );
    }

    // ── Control state machine ────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn invalid_transition_is_rejected_as_typed_event() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let _server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await;

        mux.handle.dispatch(ws_id(), Command::Pause).unwrap();
        assert_matches!(
            next(&mut sub).await,
            MuxEvent::Error { error }
                if error.kind == ErrorKind::CommandRejected && error.message.contains("pause")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_after_current_idles_on_task_completion() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let mut server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await;

        mux.handle
            .dispatch(ws_id(), Command::Start { resume: None })
            .unwrap();
        next(&mut sub).await; // Running
        server.next_sent().await;

        mux.handle.dispatch(ws_id(), Command::StopAfterCurrent).unwrap();
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::StopAfterCurrentChange { enabled: true }
        );

        server.send_json(json!({"type": "event", "event": {"type": "task_completed", "timestamp": 900}}));
        assert_matches!(next(&mut sub).await, MuxEvent::Event { .. });
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::StopAfterCurrentChange { enabled: false }
        );
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::StateChange {
                state: ControlState::Idle
            }
        );
    }

    // ── Streaming and pending events ─────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn streaming_state_follows_fragment_markers() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await;

        server.send_json(json!({"type": "event", "event": {"type": "message_start", "timestamp": 1}}));
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::StreamingState { active: true }
        );
        assert_matches!(next(&mut sub).await, MuxEvent::Event { .. });

        server.send_json(json!({"type": "event", "event": {"type": "message_stop", "timestamp": 2}}));
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::StreamingState { active: false }
        );
        assert_matches!(next(&mut sub).await, MuxEvent::Event { .. });
    }

    #[tokio::test(start_paused = true)]
    async fn pending_events_arrive_as_one_batch() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await;

        server.send_json(json!({
            "type": "pending_events",
            "events": [
                {"type": "user", "timestamp": 1, "text": "a"},
                {"type": "nonsense"},
                {"type": "user", "timestamp": 2, "text": "b"},
            ],
        }));
        assert_matches!(
            next(&mut sub).await,
            MuxEvent::PendingEvents { events } if events.len() == 2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn init_marker_adopts_server_session_id() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await;

        server.send_json(json!({"type": "event", "event": {"type": "init", "timestamp": 42, "serverSessionId": "abc"}}));
        assert_matches!(next(&mut sub).await, MuxEvent::Event { .. });
        let saved = mux.recovery.load(&ws_id()).await.unwrap();
        assert_eq!(saved.session_id.unwrap().as_str(), "abc");
    }

    // ── Reconnect and heartbeat ──────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_schedules_one_reconnect() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let mut server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await; // Connected

        mux.handle
            .dispatch(ws_id(), Command::Start { resume: None })
            .unwrap();
        next(&mut sub).await; // Running
        server.next_sent().await; // create_session
        server.send_json(json!({"type": "session_created", "sessionId": "abc"}));
        next(&mut sub).await; // SessionCreated

        let mut replacement = mux.transport.push_link();
        server.disconnect();
        assert_eq!(next(&mut sub).await, MuxEvent::Disconnected);

        // The reconnect fires once after the fixed delay and resumes the
        // known session.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(next(&mut sub).await, MuxEvent::Connected);
        assert_eq!(mux.transport.connect_count(), 2);

        let sent = replacement.next_sent().await;
        assert_eq!(sent["type"], "reconnect");
        assert_eq!(sent["sessionId"], "abc");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_at_the_configured_interval() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let mut server = mux.transport.push_link();

        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await; // Connected

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(server.next_sent().await["type"], "ping");

        // Pong is consumed, never forwarded.
        server.send_json(json!({"type": "pong"}));
        assert!(settle(&mut sub).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn last_unsubscribe_closes_the_workspace() {
        let mux = spawn_mux(Arc::new(NoPrompts));
        let _first_link = mux.transport.push_link();

        let sub = mux.handle.subscribe(ws_id()).await.unwrap();
        let sub_id = sub.id.clone();
        drop(sub);
        mux.handle.unsubscribe(ws_id(), sub_id).unwrap();
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        // A fresh subscribe starts from scratch with a new connection.
        let _second_link = mux.transport.push_link();
        let mut sub = mux.handle.subscribe(ws_id()).await.unwrap();
        assert_eq!(
            next(&mut sub).await,
            MuxEvent::StateChange {
                state: ControlState::Idle
            }
        );
        assert_eq!(next(&mut sub).await, MuxEvent::Connected);
        assert_eq!(mux.transport.connect_count(), 2);
    }
}
