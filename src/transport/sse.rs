//! Legacy SSE dialect: a push stream on `/sse` plus a POST endpoint for
//! client messages.
//!
//! Opening the stream *is* the handshake: the session is registered before the
//! first byte is written and removed when the stream is dropped.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{sse::Event, sse::Sse, IntoResponse, Response},
};
use rmcp::{model::ClientJsonRpcMessage, ServerHandler};

use super::{
    channel::{spawn_session, ChannelTransport},
    router::HttpState,
    session::{LegacySseSession, SessionHandle},
    stream::{session_ended, SessionEventStream, SessionGuard},
    CHANNEL_CAPACITY,
};

const NO_TRANSPORT: &str = "No transport found for sessionId";

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageQuery {
    session_id: Option<String>,
}

pub(crate) async fn open_stream<H>(State(state): State<HttpState<H>>) -> Response
where
    H: ServerHandler + Clone,
{
    let id = state.registry.create_id();
    let (transport, inbound, outbound) = ChannelTransport::pair(CHANNEL_CAPACITY);

    let session = Arc::new(LegacySseSession::new(id.clone(), inbound));
    let ended = session_ended(session.lifecycle(), &state.shutdown);
    let core_ended = session_ended(session.lifecycle(), &state.shutdown);
    if let Err(error) = state.registry.put(SessionHandle::LegacySse(session)) {
        tracing::error!(%error, "generated session id collided");
        return (StatusCode::INTERNAL_SERVER_ERROR, "session could not be created").into_response();
    }
    // From here on the guard owns the registry entry.
    let guard = SessionGuard::new(state.registry.clone(), id.clone());
    tracing::info!(session_id = %id, "new SSE connection");

    // Replies and core errors alike come back as `message` events.
    spawn_session(
        state.handler.clone(),
        transport,
        id.clone(),
        state.shutdown.child_token(),
        core_ended,
    );

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?sessionId={}", state.messages_path, id));
    let stream = SessionEventStream::new(outbound, state.keep_alive, ended)
        .with_prelude(endpoint)
        .with_guard(guard);

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    )
        .into_response()
}

pub(crate) async fn post_message<H>(
    State(state): State<HttpState<H>>,
    Query(MessageQuery { session_id }): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(session_id) = session_id else {
        return (StatusCode::BAD_REQUEST, NO_TRANSPORT).into_response();
    };
    let session = match state.registry.get(&session_id) {
        Some(SessionHandle::LegacySse(session)) => session,
        Some(SessionHandle::Streamable(_)) | None => {
            tracing::debug!(session_id = %session_id, "message for unknown legacy session");
            return (StatusCode::BAD_REQUEST, NO_TRANSPORT).into_response();
        }
    };

    let message: ClientJsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(error) => {
            tracing::debug!(session_id = %session_id, %error, "invalid message body");
            return (StatusCode::BAD_REQUEST, format!("Invalid message: {error}")).into_response();
        }
    };
    tracing::debug!(session_id = %session_id, ?message, "received client message");

    if !session.enqueue(message).await {
        tracing::warn!(session_id = %session_id, "session core is gone");
        return (StatusCode::GONE, "Session is closed").into_response();
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}
