//! Command-line selection of the transport.

use std::fmt;

use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// Streamable HTTP on `/mcp` plus legacy SSE on `/sse`.
    Http,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportMode::Stdio => "stdio",
            TransportMode::Http => "http",
        })
    }
}

/// Dune Analytics MCP server.
#[derive(Debug, Parser)]
#[command(name = "dune-mcp", version, about)]
pub struct Cli {
    /// Transport to serve on.
    #[arg(value_enum, env = "SERVER_TYPE", default_value_t = TransportMode::Http)]
    pub mode: TransportMode,
}
