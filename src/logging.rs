//! # Logging
//!
//! Initializes a `tracing-subscriber` formatter with UTC timestamps,
//! matching the original program's `logging.getLogger('application')`
//! stream handler and its UTC-converting formatter.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber at `level` (`trace`, `debug`,
/// `info`, `warn`, or `error`). `RUST_LOG` overrides the level when set.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_target(false)
        .init();
}
