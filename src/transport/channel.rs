//! Channel-backed rmcp transport used by both HTTP dialects.
//!
//! rmcp drives the protocol core over a `Sink + Stream` pair. The HTTP
//! handlers hold the opposite ends of the two channels: they push client
//! messages in and read whatever the core emits.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{future::BoxFuture, Sink, SinkExt, Stream, StreamExt};
use rmcp::{
    model::{ClientJsonRpcMessage, ServerJsonRpcMessage},
    service::{RxJsonRpcMessage, TxJsonRpcMessage},
    RoleServer, ServerHandler, ServiceExt,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, PollSender};

use super::session::SessionId;

/// Transport for a single HTTP session.
///
/// Implements both `Sink` and `Stream`, which is all rmcp needs to serve a
/// handler on it.
pub struct ChannelTransport {
    stream: ReceiverStream<RxJsonRpcMessage<RoleServer>>,
    sink: PollSender<TxJsonRpcMessage<RoleServer>>,
}

impl ChannelTransport {
    /// A transport plus the handler-side ends of its channels: a sender for
    /// client messages and a receiver for everything the core sends.
    pub fn pair(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Sender<ClientJsonRpcMessage>,
        mpsc::Receiver<ServerJsonRpcMessage>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let transport = Self {
            stream: ReceiverStream::new(inbound_rx),
            sink: PollSender::new(outbound_tx),
        };
        (transport, inbound_tx, outbound_rx)
    }
}

impl Sink<TxJsonRpcMessage<RoleServer>> for ChannelTransport {
    type Error = io::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink.poll_ready_unpin(cx).map_err(io::Error::other)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: TxJsonRpcMessage<RoleServer>,
    ) -> Result<(), Self::Error> {
        self.sink.start_send_unpin(item).map_err(io::Error::other)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink.poll_flush_unpin(cx).map_err(io::Error::other)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink.poll_close_unpin(cx).map_err(io::Error::other)
    }
}

impl Stream for ChannelTransport {
    type Item = RxJsonRpcMessage<RoleServer>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

/// Serve `handler` on `transport` in a background task.
///
/// The task stops when `ended` resolves or the core stops on its own. Either
/// way `ct` is cancelled and the transport is dropped, which closes the
/// outbound channel the HTTP side is reading.
pub(crate) fn spawn_session<H>(
    handler: H,
    transport: ChannelTransport,
    id: SessionId,
    ct: CancellationToken,
    ended: BoxFuture<'static, ()>,
) -> JoinHandle<()>
where
    H: ServerHandler,
{
    tokio::spawn(async move {
        let service_ct = ct.clone();
        let service_id = id.clone();
        let serve = async move {
            let running = match handler.serve_with_ct(transport, service_ct).await {
                Ok(running) => running,
                Err(error) => {
                    tracing::warn!(session_id = %service_id, %error, "session handshake failed");
                    return;
                }
            };
            match running.waiting().await {
                Ok(reason) => tracing::debug!(session_id = %service_id, ?reason, "session service stopped"),
                Err(error) => tracing::error!(session_id = %service_id, %error, "session service panicked"),
            }
        };
        tokio::select! {
            _ = serve => {}
            _ = ended => tracing::debug!(session_id = %id, "session ended, stopping service"),
        }
        ct.cancel();
    })
}
