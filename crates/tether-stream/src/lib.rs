//! # tether-stream
//!
//! Pure event-history processing between the wire and persistence:
//!
//! - **Stream reduction** ([`reduce`]): a two-pass algorithm that folds a
//!   flat ordered stream of message fragments into complete renderable
//!   events plus at most one in-progress streaming message, deduplicating
//!   non-streamed "final form" echoes
//! - **Session boundary detection** ([`boundary`]): the active session
//!   identifier, just-ended detection, task metadata extraction, and the
//!   keep/discard verdict for closed sessions

#![deny(unsafe_code)]

pub mod boundary;
pub mod reduce;

pub use boundary::{
    Analysis, BoundaryDetector, DetectedSession, SessionInfo, TaskDirectory, TaskHint,
};
pub use reduce::{ReduceResult, ReducerConfig, reduce};
