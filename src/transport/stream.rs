//! Server-push event stream shared by both HTTP dialects.
//!
//! One value owns everything a live stream needs: the outbound message queue,
//! the keep-alive timer and, for legacy sessions, the registry entry. Dropping
//! the stream (client disconnect) releases all three on the same path.

use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use axum::response::sse::Event;
use futures::{future::BoxFuture, FutureExt, Stream, StreamExt};
use rmcp::model::ServerJsonRpcMessage;
use tokio::{
    sync::mpsc,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tokio_util::sync::CancellationToken;

use super::session::{Lifecycle, SessionId, SessionRegistry};

/// Default spacing of `: keep-alive` comments on idle streams.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(1500);

/// Text of the keep-alive comment frame, sent as `: keep-alive`.
pub const KEEP_ALIVE_COMMENT: &str = "keep-alive";

/// Removes a session from the registry when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
    id: SessionId,
}

impl SessionGuard {
    /// Guard the registry entry for `id`.
    pub fn new(registry: SessionRegistry, id: SessionId) -> Self {
        Self { registry, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.id).is_some() {
            tracing::info!(session_id = %self.id, "stream closed, session released");
        }
    }
}

/// Future that resolves when the session closes or the server shuts down.
pub fn session_ended(lifecycle: &Lifecycle, shutdown: &CancellationToken) -> BoxFuture<'static, ()> {
    let closed = lifecycle.closed();
    let shutdown = shutdown.clone();
    async move {
        tokio::select! {
            _ = closed => {}
            _ = shutdown.cancelled() => {}
        }
    }
    .boxed()
}

/// Ordered stream of protocol messages with keep-alive comments between them.
pub struct SessionEventStream {
    prelude: Option<Event>,
    messages: ReceiverStream<ServerJsonRpcMessage>,
    keep_alive: IntervalStream,
    ended: BoxFuture<'static, ()>,
    guard: Option<SessionGuard>,
    finished: bool,
}

impl SessionEventStream {
    /// Stream `messages` as `message` events until `ended` resolves or the
    /// sender side goes away, with a comment every `keep_alive` in between.
    pub fn new(
        messages: mpsc::Receiver<ServerJsonRpcMessage>,
        keep_alive: Duration,
        ended: BoxFuture<'static, ()>,
    ) -> Self {
        // The first tick is one full period away; an immediate tick would put
        // a comment ahead of the endpoint event.
        let mut interval = interval_at(Instant::now() + keep_alive, keep_alive);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            prelude: None,
            messages: ReceiverStream::new(messages),
            keep_alive: IntervalStream::new(interval),
            ended,
            guard: None,
            finished: false,
        }
    }

    /// Emit `event` before anything else.
    pub fn with_prelude(mut self, event: Event) -> Self {
        self.prelude = Some(event);
        self
    }

    /// Tie a registry entry to the lifetime of this stream.
    pub fn with_guard(mut self, guard: SessionGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    fn finish(&mut self) -> Poll<Option<Result<Event, Infallible>>> {
        self.finished = true;
        self.guard.take();
        Poll::Ready(None)
    }
}

fn message_event(message: &ServerJsonRpcMessage) -> Option<Event> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Event::default().event("message").data(json)),
        Err(error) => {
            tracing::error!(?error, "failed to encode outbound message");
            None
        }
    }
}

impl Stream for SessionEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some(event) = this.prelude.take() {
            return Poll::Ready(Some(Ok(event)));
        }
        if this.ended.poll_unpin(cx).is_ready() {
            return this.finish();
        }

        loop {
            match this.messages.poll_next_unpin(cx) {
                Poll::Ready(Some(message)) => {
                    if let Some(event) = message_event(&message) {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Poll::Ready(None) => return this.finish(),
                Poll::Pending => break,
            }
        }

        match this.keep_alive.poll_next_unpin(cx) {
            Poll::Ready(Some(_)) => Poll::Ready(Some(Ok(Event::default().comment(KEEP_ALIVE_COMMENT)))),
            _ => Poll::Pending,
        }
    }
}
