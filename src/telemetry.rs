//! Tracing subscriber bootstrap.
//!
//! The SDK emits spans and events through `tracing` but never installs a
//! subscriber on its own. Host applications that want console output can call
//! [`init_tracing`] once at startup; embedding applications with their own
//! subscriber skip it entirely.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// the given level for this crate.
///
/// Returns quietly if a subscriber is already installed.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("agentpay_rs={default_level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
