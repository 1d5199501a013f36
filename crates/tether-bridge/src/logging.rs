//! Tracing subscriber configuration for the bridge.
//!
//! Log levels follow these conventions:
//! - ERROR: channel setup failures, failed event registrations
//! - WARN: duplex stream failures, dropped outbound envelopes, undecodable requests
//! - INFO: lifecycle (channel started/closed, listen started/stopped)
//! - DEBUG: per-call and per-request detail
//! - TRACE: wire frames

use tracing_subscriber::EnvFilter;

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `default_level` (usually the
/// configured `[logging] level`) is used.
pub fn init(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .init();
}

/// Initialize the tracing subscriber with JSON output.
///
/// Activated by setting `RUST_LOG_FORMAT=json`.
pub fn init_json(default_level: &str) {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(default_level))
        .init();
}

/// Initialize the tracing subscriber for tests.
///
/// Uses `try_init` so it can be called from every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
