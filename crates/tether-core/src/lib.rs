//! # tether-core
//!
//! Foundation types shared by every Tether crate:
//!
//! - **Branded IDs**: `SessionId`, `WorkspaceId`, `TaskId`, `SubscriberId`
//!   as newtypes for type safety
//! - **Normalized events**: the closed [`EventKind`](events::EventKind) sum
//!   type that everything downstream of the wire boundary consumes
//! - **Content blocks**: text / thinking / tool-use units of an assistant
//!   message, including the transient in-progress
//!   [`StreamingMessage`](events::StreamingMessage)
//! - **Constants**: default timing windows and thresholds
//! - **Logging**: `tracing-subscriber` initialization for host binaries

#![deny(unsafe_code)]

pub mod constants;
pub mod control;
pub mod events;
pub mod ids;
pub mod logging;

pub use control::ControlState;
pub use events::{BlockStart, ContentBlock, EventKind, Fragment, NormalizedEvent, StreamingMessage};
pub use ids::{SessionId, SubscriberId, TaskId, WorkspaceId};
