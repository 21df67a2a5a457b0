//! Transports for the MCP server.
//!
//! - **streamable**: modern HTTP dialect on `/mcp` (session id in `mcp-session-id`)
//! - **sse**: legacy dialect, push stream on `/sse`, messages on `/messages?sessionId=`
//! - **stdio**: newline-delimited JSON on stdin/stdout, one implicit session
//!
//! The two HTTP dialects share one [`SessionRegistry`] owned by [`McpHttpServer`].
//! Each HTTP session runs its own copy of the rmcp `ServerHandler`, fed
//! through a [`ChannelTransport`].

mod channel;
mod error;
mod router;
mod session;
mod sse;
mod stdio;
mod stream;
mod streamable;

pub use channel::ChannelTransport;
pub use error::TransportError;
pub use router::{McpHttpServer, MCP_PATH, MCP_SESSION_ID_HEADER, MESSAGES_PATH, SSE_PATH};
pub use session::{
    DuplicateSession, LegacySseSession, Lifecycle, LifecycleState, SessionHandle, SessionId,
    SessionRegistry, StreamableSession, TransportKind,
};
pub use stdio::{serve_io, serve_stdio};
pub use stream::{SessionEventStream, SessionGuard, KEEP_ALIVE_INTERVAL};

/// Buffer size of per-session message queues.
const CHANNEL_CAPACITY: usize = 64;
