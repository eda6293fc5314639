//! Tracing subscriber setup for binaries and demos.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "mlvault=info";

/// Install a `fmt` subscriber honouring `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already installed, so calling
/// this from several tests or entry points is harmless.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
