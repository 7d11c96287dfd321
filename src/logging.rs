//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{GraphError, Result};

/// Installs a global `fmt` subscriber filtered by `level`
/// (any [`EnvFilter`] directive, e.g. `"info"` or `"graft::ingress=debug"`).
///
/// Fails if the directive does not parse or a subscriber is already set.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| GraphError::Config(format!("invalid log filter: {e}")))?,
        )
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(|_| GraphError::Config("logging already initialized".into()))
}
