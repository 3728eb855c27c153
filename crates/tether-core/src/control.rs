//! The per-workspace control state.
//!
//! Valid transitions form the chain `Idle ↔ Running ↔ Paused`, plus
//! `Running/Paused → Idle`. `Idle → Paused` is not a valid transition.
//! Validation itself lives in the multiplexer's command handlers; this
//! module only defines the state vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control state of a workspace's agent loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    /// No agent loop running.
    #[default]
    Idle,
    /// Agent loop running.
    Running,
    /// Agent loop paused by the user.
    Paused,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

impl ControlState {
    /// Parse from the wire/storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_parse() {
        for state in [ControlState::Idle, ControlState::Running, ControlState::Paused] {
            assert_eq!(ControlState::parse(&state.to_string()), Some(state));
        }
    }

    #[test]
    fn parse_rejects_unknown() {
        assert_eq!(ControlState::parse("stopped"), None);
    }

    #[test]
    fn default_is_idle() {
        assert_eq!(ControlState::default(), ControlState::Idle);
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&ControlState::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
