//! # tether-store
//!
//! `SQLite` persistence for Tether sessions and events:
//!
//! - **Stable event identity** ([`identity`]): server-assigned IDs win,
//!   otherwise IDs derive from session, timestamp, type, and a content
//!   digest (never array position)
//! - **Transactional store** ([`store`]): idempotent snapshot writes with
//!   write-once `completed_at`, plus per-workspace crash-recovery snapshots
//! - **Debounced coordinator** ([`coordinator`]): coalesces bursts of
//!   snapshot updates into one write per debounce window
//! - **Boundary-driven persister** ([`persister`]): maps detected session
//!   boundaries onto eager, debounced, and discard writes

#![deny(unsafe_code)]

pub mod coordinator;
pub mod errors;
pub mod identity;
pub mod persister;
pub mod sqlite;
pub mod store;

pub use coordinator::PersistenceCoordinator;
pub use errors::{Result, StoreError};
pub use identity::stable_event_id;
pub use persister::SessionPersister;
pub use store::{PersistOutcome, RecoverySnapshot, SessionRecord, SessionSnapshot, SessionStore};
