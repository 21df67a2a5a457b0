//! Dune Analytics MCP server.
//!
//! Exposes Dune data-fetch operations as MCP tools over three transports:
//!
//! - **streamable HTTP** on `/mcp`, sessions keyed by the `mcp-session-id` header
//! - **legacy SSE** on `/sse` with client messages posted to `/messages?sessionId=`
//! - **stdio**, newline-delimited JSON on the process pipes
//!
//! # Features
//!
//! - `auth` - shared-token middleware for the HTTP surface
//! - `config` - environment configuration and transport-mode parsing
//! - `transport` - session registry and the transports, served by `rmcp`
//! - `tools` - the Dune client and the protocol server core
//! - `bootstrap` - tracing setup
//! - `full` - all of the above (default)
//!
//! # Example
//!
//! ```rust,ignore
//! use dune_mcp::{init_tracing, DuneClient, McpHttpServer, McpServer, ServerConfig};
//!
//! init_tracing("dune_mcp=debug");
//! let config = ServerConfig::from_env()?;
//! let client = DuneClient::new(&config.dune_api_url, config.dune_api_key.clone())?;
//! let server = McpHttpServer::new(McpServer::new(client));
//! axum::serve(listener, server.router()).await?;
//! ```

#[cfg(feature = "auth")]
pub mod auth;

#[cfg(feature = "config")]
pub mod config;

#[cfg(feature = "transport")]
pub mod transport;

#[cfg(feature = "tools")]
pub mod dune;

#[cfg(feature = "tools")]
pub mod server;

#[cfg(feature = "bootstrap")]
pub mod bootstrap;

#[cfg(feature = "auth")]
pub use auth::{TokenAuthLayer, TokenAuthService};

#[cfg(feature = "config")]
pub use config::{Cli, ConfigError, ServerConfig, TransportMode};

#[cfg(feature = "transport")]
pub use transport::{
    serve_io, serve_stdio, ChannelTransport, McpHttpServer, SessionRegistry, TransportError,
};

#[cfg(feature = "tools")]
pub use dune::{DuneClient, DuneError};

#[cfg(feature = "tools")]
pub use server::McpServer;

#[cfg(feature = "bootstrap")]
pub use bootstrap::init_tracing;
