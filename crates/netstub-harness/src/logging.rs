//! Logging setup
//!
//! Installs a `tracing_subscriber::fmt` subscriber writing through the test
//! capture. `RUST_LOG` wins over the configured level when set.

use tracing_subscriber::EnvFilter;

use netstub_core::EngineConfig;

/// Default filter for the configured verbosity
pub fn default_filter(config: &EngineConfig) -> &'static str {
    if config.debug {
        "netstub_core=debug,netstub_harness=debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber; returns false if one was already set
pub fn init_logging(config: &EngineConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init()
        .is_ok()
}
