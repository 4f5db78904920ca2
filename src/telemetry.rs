//! Tracing setup for simulations.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "fedprivacy=info";

/// Install a formatted `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `filter`. Returns `false` if a global
/// subscriber was already installed.
pub fn init_tracing(filter: Option<&str>) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
