//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON file
//! format. Each type implements [`Default`] with production default values.
//! Types marked with `#[serde(default)]` allow partial JSON; missing fields
//! get their default value during deserialization.

use serde::{Deserialize, Serialize};

use tether_core::constants::{
    DEFAULT_ECHO_WINDOW_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_INFLIGHT_ECHO_WINDOW_MS,
    DEFAULT_READY_POLL_INTERVAL_MS, DEFAULT_READY_TIMEOUT_MS, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_WRITE_DEBOUNCE_MS, MIN_SESSION_EVENTS,
};

/// Root settings type for the Tether control plane.
///
/// Loaded from `~/.tether/settings.json` with defaults applied for missing
/// fields. `TETHER_*` environment variables override specific values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Settings schema version.
    pub version: String,
    /// Instance identifier, used in synthetic session IDs.
    pub instance_id: String,
    /// Link and transport settings.
    pub link: LinkSettings,
    /// Stream reduction and boundary detection settings.
    pub stream: StreamSettings,
    /// Persistence settings.
    pub persistence: PersistenceSettings,
}

impl Default for TetherSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            instance_id: "default".to_string(),
            link: LinkSettings::default(),
            stream: StreamSettings::default(),
            persistence: PersistenceSettings::default(),
        }
    }
}

/// Link and transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkSettings {
    /// WebSocket URL of the agent process.
    pub server_url: String,
    /// Fixed delay before a reconnect attempt, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Heartbeat ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Interval between server readiness probes, in milliseconds.
    pub ready_poll_interval_ms: u64,
    /// Total readiness polling budget in milliseconds.
    pub ready_timeout_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            ready_poll_interval_ms: DEFAULT_READY_POLL_INTERVAL_MS,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
        }
    }
}

/// Stream reduction and boundary detection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Echo dedup window around completed streamed messages, in milliseconds.
    pub echo_window_ms: i64,
    /// Echo dedup window measured from an in-flight message's start, in
    /// milliseconds.
    pub inflight_echo_window_ms: i64,
    /// Minimum events for a closed session to be worth keeping.
    pub min_session_events: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            echo_window_ms: DEFAULT_ECHO_WINDOW_MS,
            inflight_echo_window_ms: DEFAULT_INFLIGHT_ECHO_WINDOW_MS,
            min_session_events: MIN_SESSION_EVENTS,
        }
    }
}

/// Persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceSettings {
    /// Path to the SQLite database (relative to `~/.tether`).
    pub db_path: String,
    /// Debounce window for session writes, in milliseconds.
    pub write_debounce_ms: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            db_path: "tether.db".to_string(),
            write_debounce_ms: DEFAULT_WRITE_DEBOUNCE_MS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let settings = TetherSettings::default();
        assert_eq!(settings.instance_id, "default");
        assert_eq!(settings.link.reconnect_delay_ms, 3_000);
        assert_eq!(settings.link.heartbeat_interval_ms, 30_000);
        assert_eq!(settings.link.ready_timeout_ms, 10_000);
        assert_eq!(settings.stream.echo_window_ms, 1_000);
        assert_eq!(settings.stream.inflight_echo_window_ms, 30_000);
        assert_eq!(settings.stream.min_session_events, 3);
        assert_eq!(settings.persistence.write_debounce_ms, 500);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"link": {"serverUrl": "ws://10.0.0.5:9090"}}"#;
        let settings: TetherSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.link.server_url, "ws://10.0.0.5:9090");
        assert_eq!(settings.link.reconnect_delay_ms, 3_000);
        assert_eq!(settings.persistence.db_path, "tether.db");
    }

    #[test]
    fn field_names_are_camel_case() {
        let value = serde_json::to_value(TetherSettings::default()).unwrap();
        assert!(value["link"]["serverUrl"].is_string());
        assert!(value["stream"]["echoWindowMs"].is_i64());
        assert!(value["persistence"]["writeDebounceMs"].is_u64());
        assert!(value["instanceId"].is_string());
    }
}
