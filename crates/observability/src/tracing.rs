//! Tracing subscriber setup for the hold engine services.

use tracing_subscriber::EnvFilter;

/// Install the process-wide subscriber: JSON lines to stdout, filtered via
/// `RUST_LOG` with the engine crates at `info` by default.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockhold_engine=info,stockhold_infra=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .try_init();
}
