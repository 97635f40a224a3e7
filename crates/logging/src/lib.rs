//! Logging setup shared by the repeater binaries
//!
//! `RUST_LOG` always wins; otherwise the verbosity flag picks the filter.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter with `--verbose`
pub const VERBOSE_FILTER: &str = "info,vncrepeater=debug";

/// Default filter otherwise
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber
pub fn init(verbose: bool) {
    init_with_filter(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER });
}

/// Install the global subscriber with `fallback` used when `RUST_LOG` is
/// unset or unparsable. A second call is a no-op.
pub fn init_with_filter(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
