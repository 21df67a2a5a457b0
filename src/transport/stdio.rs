//! Stdio transport: newline-delimited JSON-RPC over the process pipes.
//!
//! There is exactly one implicit session, so nothing is registered.

use std::io;

use rmcp::{ServerHandler, ServiceExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Serve `handler` on the process's stdin and stdout until EOF or shutdown.
pub async fn serve_stdio<H>(handler: H, shutdown: CancellationToken) -> io::Result<()>
where
    H: ServerHandler,
{
    tracing::info!("serving MCP on stdin/stdout");
    let (stdin, stdout) = rmcp::transport::stdio();
    serve_io(handler, stdin, stdout, shutdown).await
}

/// Serve `handler` on an arbitrary reader/writer pair.
///
/// A client that goes away before finishing the handshake is not an error.
pub async fn serve_io<H, R, W>(
    handler: H,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    H: ServerHandler,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let running = tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("shutdown requested before handshake");
            return Ok(());
        }
        served = handler.serve_with_ct((reader, writer), shutdown.child_token()) => match served {
            Ok(running) => running,
            Err(error) => {
                tracing::warn!(%error, "stdio handshake failed");
                return Ok(());
            }
        },
    };
    tracing::info!("stdio session initialized");

    match running.waiting().await {
        Ok(reason) => {
            tracing::info!(?reason, "stdio session closed");
            Ok(())
        }
        Err(error) => Err(io::Error::other(error)),
    }
}
