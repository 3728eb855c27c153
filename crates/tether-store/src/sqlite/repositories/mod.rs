//! Stateless repositories, one per table. Every method takes `&Connection`
//! so callers control transaction boundaries.

pub mod event;
pub mod recovery;
pub mod session;
