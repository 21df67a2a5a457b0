//! Tracing initialization.
//!
//! Log output always goes to stderr: in stdio mode stdout carries protocol
//! frames and a single stray log line would corrupt the stream.

use tracing_subscriber::{fmt, prelude::*, util::TryInitError, EnvFilter};

/// Default filter used by the `dune-mcp` binary.
pub const DEFAULT_FILTER: &str = "dune_mcp=info,tower_http=info";

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber, failing if one is already set.
///
/// `RUST_LOG` overrides `default_filter` when it parses.
pub fn try_init_tracing(default_filter: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(env_filter(default_filter))
        .try_init()
}

/// Like [`try_init_tracing`] but tolerates an already installed subscriber.
///
/// ```rust
/// use dune_mcp::init_tracing;
///
/// init_tracing("dune_mcp=debug,info");
/// ```
pub fn init_tracing(default_filter: &str) {
    if let Err(error) = try_init_tracing(default_filter) {
        eprintln!("tracing already initialized: {error}");
    }
}
