//! Logging initialization for host binaries and tests.
//!
//! Tether crates emit structured `tracing` events; the host decides where
//! they go. [`init`] installs a plain fmt subscriber filtered by the
//! `TETHER_LOG` environment variable (default `info`).

use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter.
pub const LOG_ENV_VAR: &str = "TETHER_LOG";

/// Install the global fmt subscriber.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }

    #[test]
    fn log_env_var_name() {
        assert_eq!(LOG_ENV_VAR, "TETHER_LOG");
    }
}
