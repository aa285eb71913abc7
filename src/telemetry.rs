//! Logging setup for the `live_code_search` binary.
//!
//! A `tracing-subscriber` registry with an `EnvFilter` (honours `RUST_LOG`) and a
//! compact `fmt` layer writing to stderr, so `--json` output on stdout stays clean.

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `log_level` applies when `RUST_LOG` is unset.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(log_level: Level) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
