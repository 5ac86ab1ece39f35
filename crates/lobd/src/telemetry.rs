//! Telemetry initialization for the content server.
//!
//! Logging goes to stderr only; stdout carries protocol frames and must
//! stay clean.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber, filtered by `RUST_LOG` or the
/// configured level.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
