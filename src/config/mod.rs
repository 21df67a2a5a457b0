//! Configuration from the environment and the command line.

mod base;
mod mode;

pub use base::{ConfigError, ServerConfig, DEFAULT_DUNE_API_URL};
pub use mode::{Cli, TransportMode};
