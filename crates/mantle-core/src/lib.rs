// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

/// Default filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "info,mantle_present=debug";

pub fn init_tracing() {
    init_tracing_with(DEFAULT_LOG_FILTER);
}

/// Installs the global `fmt` subscriber. `RUST_LOG` wins over `fallback`.
/// Calling this twice is harmless; the second install is ignored.
pub fn init_tracing_with(fallback: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let installed = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("tracing initialised (fallback filter: {fallback})");
    }
}
