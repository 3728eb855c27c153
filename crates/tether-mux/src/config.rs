//! Multiplexer configuration.

use std::time::Duration;

use tether_core::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_READY_POLL_INTERVAL_MS, DEFAULT_READY_TIMEOUT_MS,
    DEFAULT_RECONNECT_DELAY_MS,
};
use tether_settings::LinkSettings;

/// Timing and addressing configuration for the multiplexer.
#[derive(Clone, Debug)]
pub struct MuxConfig {
    /// WebSocket URL of the agent process.
    pub server_url: String,
    /// Fixed delay before the single reconnect attempt.
    pub reconnect_delay: Duration,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Interval between readiness probes while connecting.
    pub ready_poll_interval: Duration,
    /// Total readiness polling budget.
    pub ready_timeout: Duration,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".to_string(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            ready_poll_interval: Duration::from_millis(DEFAULT_READY_POLL_INTERVAL_MS),
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
        }
    }
}

impl From<&LinkSettings> for MuxConfig {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            server_url: settings.server_url.clone(),
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            ready_poll_interval: Duration::from_millis(settings.ready_poll_interval_ms),
            ready_timeout: Duration::from_millis(settings.ready_timeout_ms),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
