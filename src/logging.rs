// Structured logging bootstrap for hosts embedding the pipeline.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "vigil=info";

/// Install a fmt subscriber filtered by `RUST_LOG` (default `vigil=info`).
///
/// Safe to call more than once: later calls are no-ops when a global
/// subscriber is already set, which is the common case in test binaries.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init();
}
