//! # tether-mux
//!
//! The connection multiplexer: one shared transport link per workspace,
//! fanned out to any number of subscribers.
//!
//! - **Actor**: a single task owns all per-workspace state; hosts talk to
//!   it through the cloneable [`MuxHandle`]
//! - **Link lifecycle**: readiness polling, connect, heartbeat, a single
//!   fixed-delay reconnect after an unexpected close
//! - **Control state machine**: `Idle → Running → Paused`, with invalid
//!   transitions rejected as typed error events on the stream
//! - **Session continuity**: the session and control state are remembered
//!   in a [`RecoveryCache`] and replayed across link drops and host reloads
//!
//! The transport itself is a seam ([`Transport`]); production uses
//! [`WsTransport`] over `tokio-tungstenite`, tests use channel-backed
//! fakes.

#![deny(unsafe_code)]

pub mod actor;
pub mod config;
pub mod errors;
pub mod recovery;
pub mod state;
pub mod traits;
pub mod ws;

pub use actor::{MuxHandle, Multiplexer, Subscription};
pub use config::MuxConfig;
pub use errors::{MuxError, Result};
pub use recovery::{MemoryRecoveryCache, StoreRecoveryCache};
pub use state::{LinkState, apply_control};
pub use traits::{
    LinkPair, LinkReceiver, LinkSender, NoPrompts, PromptSource, RecoveredState, RecoveryCache,
    Transport,
};
pub use ws::WsTransport;
