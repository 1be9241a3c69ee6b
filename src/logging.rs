//! Optional subscriber for binaries and tests that embed the analysis.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{GcJoinError, GcJoinResult};

pub const DEFAULT_FILTER: &str = "gcjoin=info";

/// `RUST_LOG` wins over `verbose`; otherwise `gcjoin=debug` or [`DEFAULT_FILTER`].
pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("gcjoin=debug")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    })
}

/// Installs a global fmt subscriber. Fails if one is already installed.
pub fn init(verbose: bool, no_color: bool) -> GcJoinResult<()> {
    let layer = fmt::layer()
        .with_ansi(!no_color)
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(layer)
        .try_init()
        .map_err(|e| GcJoinError::Config(format!("failed to initialize logging: {e}")))
}
