//! Package-level constants and default timing values.
//!
//! Every timing value here is a default, not a contract: the settings layer
//! can override each one at load time.

/// Current version of Tether (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "tether";

/// Window after a completed streaming range's stop inside which a
/// non-streamed assistant event is treated as an echo (inclusive).
pub const DEFAULT_ECHO_WINDOW_MS: i64 = 1_000;

/// Window at/after an in-progress streaming range's start inside which a
/// non-streamed assistant event is treated as an early-arriving echo.
pub const DEFAULT_INFLIGHT_ECHO_WINDOW_MS: i64 = 30_000;

/// Quiet period before a debounced persistence write fires.
pub const DEFAULT_WRITE_DEBOUNCE_MS: u64 = 500;

/// Fixed delay before the single reconnect attempt after an unexpected close.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

/// Interval between keep-alive pings while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Interval between transport readiness polls during `start`.
pub const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 100;

/// Total time budget for the readiness poll before `start` gives up.
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;

/// Sessions with fewer events than this are discarded as noise.
pub const MIN_SESSION_EVENTS: usize = 3;

/// Terminal markers recognized as a "nothing to do" completion signal.
///
/// A just-closed session whose final text contains one of these and which
/// never started a task is noise and is deleted rather than kept.
pub const COMPLETION_SIGNALS: &[&str] = &["COMPLETE", "NOTHING_TO_DO", "NO_CHANGES_NEEDED"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn name_is_lowercase() {
        assert_eq!(NAME, NAME.to_lowercase());
    }

    #[test]
    fn echo_window_smaller_than_inflight_window() {
        assert!(DEFAULT_ECHO_WINDOW_MS < DEFAULT_INFLIGHT_ECHO_WINDOW_MS);
    }

    #[test]
    fn completion_signals_are_uppercase() {
        for signal in COMPLETION_SIGNALS {
            assert_eq!(*signal, signal.to_uppercase());
        }
    }
}
