//! # tether-protocol
//!
//! The wire boundary between Tether and the agent server, plus the typed
//! stream the multiplexer exposes to hosts:
//!
//! - **Inbound**: [`ServerMessage`](wire::ServerMessage), JSON discriminated
//!   by `type`
//! - **Outbound**: [`ClientCommand`](wire::ClientCommand)
//! - **Parsing layer**: [`parse::parse_wire_event`] — the one place where
//!   stringly-typed wire shapes become the closed `EventKind` sum type
//! - **Host-facing**: [`MuxEvent`](host::MuxEvent) and
//!   [`Command`](host::Command)

#![deny(unsafe_code)]

pub mod errors;
pub mod host;
pub mod parse;
pub mod wire;

pub use errors::{Result, WireError};
pub use host::{Command, ErrorEvent, ErrorKind, MuxEvent};
pub use wire::{ClientCommand, ServerMessage};
