//! Tracing subscriber setup for the binary.
//!
//! Diagnostics go to stderr; user-facing status lines stay on stdout.
//! `RUST_LOG` overrides the level picked from `-v` flags.

use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Map `-v` occurrences to a default level.
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn build_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level_for(verbosity).into())
        .from_env_lossy()
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbosity: u8) {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(build_filter(verbosity))
        .try_init();
}
