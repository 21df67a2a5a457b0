//! Streamable HTTP dialect: `GET`, `POST` and `DELETE` on a single endpoint.
//!
//! Sessions are created in exactly one place, [`initialize`], after the
//! protocol core accepted an `initialize` request. Every other path only looks
//! sessions up, so a client can never mint or adopt an id it was not given.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{sse::Sse, IntoResponse, Response},
    Json,
};
use rmcp::{
    model::{
        ClientJsonRpcMessage, ClientRequest, JsonRpcMessage, JsonRpcRequest, RequestId,
        ServerJsonRpcMessage,
    },
    ServerHandler,
};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    channel::{spawn_session, ChannelTransport},
    error::TransportError,
    router::{HttpState, MCP_SESSION_ID_HEADER},
    session::{SessionHandle, SessionRegistry, StreamableSession},
    stream::{session_ended, SessionEventStream},
    CHANNEL_CAPACITY,
};

pub(crate) async fn handle<H>(
    State(state): State<HttpState<H>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    H: ServerHandler + Clone,
{
    tracing::debug!(%method, "streamable request");
    let result = match method {
        Method::POST => handle_post(&state, &headers, &body).await,
        Method::GET => handle_get(&state, &headers).await,
        Method::DELETE => handle_delete(&state, &headers),
        _ => Err(TransportError::MethodNotAllowed),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

/// Look up a streamable session, rejecting unknown ids and legacy sessions.
fn resolve(registry: &SessionRegistry, id: &str) -> Result<Arc<StreamableSession>, TransportError> {
    match registry.get(id) {
        Some(SessionHandle::Streamable(session)) => Ok(session),
        Some(other @ SessionHandle::LegacySse(_)) => Err(TransportError::TransportMismatch {
            id: other.id().clone(),
            actual: other.kind(),
        }),
        None => Err(TransportError::SessionNotFound(id.into())),
    }
}

fn with_session_header(mut response: Response, session: &StreamableSession) -> Response {
    if let Ok(value) = HeaderValue::from_str(session.id()) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

fn decode(value: Value) -> Result<ClientJsonRpcMessage, TransportError> {
    serde_json::from_value(value).map_err(TransportError::InvalidMessage)
}

fn request_id(message: &ClientJsonRpcMessage) -> Option<RequestId> {
    match message {
        JsonRpcMessage::Request(request) => Some(request.id.clone()),
        _ => None,
    }
}

fn is_initialize(message: &ClientJsonRpcMessage) -> bool {
    matches!(
        message,
        JsonRpcMessage::Request(JsonRpcRequest {
            request: ClientRequest::InitializeRequest(_),
            ..
        })
    )
}

async fn handle_post<H>(
    state: &HttpState<H>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, TransportError>
where
    H: ServerHandler + Clone,
{
    let value: Value = serde_json::from_slice(body)?;

    let Some(id) = session_header(headers) else {
        let message = match value {
            Value::Array(_) => return Err(TransportError::SessionRequired),
            value => decode(value)?,
        };
        return match request_id(&message) {
            Some(request_id) if is_initialize(&message) => {
                initialize(state, request_id, message).await
            }
            _ => Err(TransportError::SessionRequired),
        };
    };

    let session = resolve(&state.registry, id)?;
    let response = match value {
        Value::Array(items) => forward_batch(&session, items).await?,
        value => forward(&session, decode(value)?).await?,
    };
    Ok(with_session_header(response, &session))
}

/// The only code path that creates streamable sessions.
///
/// The session's core is started first and handed the `initialize` request;
/// the session is registered only if the core answered with a result.
async fn initialize<H>(
    state: &HttpState<H>,
    request_id: RequestId,
    message: ClientJsonRpcMessage,
) -> Result<Response, TransportError>
where
    H: ServerHandler + Clone,
{
    let id = state.registry.create_id();
    let (transport, inbound, outbound) = ChannelTransport::pair(CHANNEL_CAPACITY);
    let session = Arc::new(StreamableSession::new(id.clone(), inbound));

    spawn_session(
        state.handler.clone(),
        transport,
        id,
        state.shutdown.child_token(),
        session_ended(session.lifecycle(), &state.shutdown),
    );
    tokio::spawn(route_outbound(
        session.clone(),
        state.registry.clone(),
        outbound,
    ));

    let Some(reply) = session.request(request_id, message).await else {
        tracing::error!(session_id = %session.id(), "protocol core stopped during initialize");
        session.lifecycle().close();
        return Err(TransportError::Internal);
    };
    if !matches!(reply, JsonRpcMessage::Response(_)) {
        // The core refused the handshake; nothing was registered.
        session.lifecycle().close();
        return Ok(Json(reply).into_response());
    }

    if !session.lifecycle().activate() {
        return Err(TransportError::Internal);
    }
    state
        .registry
        .put(SessionHandle::Streamable(session.clone()))
        .map_err(|error| {
            tracing::error!(%error, "generated session id collided");
            session.lifecycle().close();
            TransportError::Internal
        })?;
    tracing::info!(session_id = %session.id(), "streamable session initialized");

    Ok(with_session_header(Json(reply).into_response(), &session))
}

/// Drain everything a session's core sends, then tear the session down.
async fn route_outbound(
    session: Arc<StreamableSession>,
    registry: SessionRegistry,
    mut outbound: mpsc::Receiver<ServerJsonRpcMessage>,
) {
    while let Some(message) = outbound.recv().await {
        session.route(message).await;
    }
    session.fail_pending();
    session.lifecycle().close();
    registry.remove(session.id());
    tracing::debug!(session_id = %session.id(), "session core finished");
}

async fn forward(
    session: &StreamableSession,
    message: ClientJsonRpcMessage,
) -> Result<Response, TransportError> {
    if is_initialize(&message) {
        return Err(TransportError::AlreadyInitialized);
    }
    match request_id(&message) {
        Some(id) => {
            let reply = session.request(id, message).await.ok_or_else(|| {
                tracing::error!(session_id = %session.id(), "protocol core is gone");
                TransportError::Internal
            })?;
            Ok(Json(reply).into_response())
        }
        None if session.deliver(message).await => Ok(StatusCode::ACCEPTED.into_response()),
        None => Err(TransportError::Internal),
    }
}

/// Process a batch in order. Each entry that is not a well-formed message
/// gets its own error object; the other entries still run.
async fn forward_batch(
    session: &StreamableSession,
    items: Vec<Value>,
) -> Result<Response, TransportError> {
    if items.is_empty() {
        return Err(TransportError::EmptyBatch);
    }

    let mut replies = Vec::new();
    for item in items {
        let message = match decode(item) {
            Ok(message) => message,
            Err(error) => {
                replies.push(error.envelope());
                continue;
            }
        };
        if is_initialize(&message) {
            replies.push(TransportError::AlreadyInitialized.envelope());
            continue;
        }
        match request_id(&message) {
            Some(id) => {
                let reply = session
                    .request(id, message)
                    .await
                    .ok_or(TransportError::Internal)?;
                replies.push(
                    serde_json::to_value(reply).map_err(|_| TransportError::Internal)?,
                );
            }
            None => {
                if !session.deliver(message).await {
                    return Err(TransportError::Internal);
                }
            }
        }
    }

    if replies.is_empty() {
        Ok(StatusCode::ACCEPTED.into_response())
    } else {
        Ok(Json(Value::Array(replies)).into_response())
    }
}

/// Standalone server-push stream for messages the core sends unprompted.
async fn handle_get<H>(
    state: &HttpState<H>,
    headers: &HeaderMap,
) -> Result<Response, TransportError> {
    if !accepts_event_stream(headers) {
        return Err(TransportError::NotAcceptable);
    }
    let id = session_header(headers).ok_or(TransportError::SessionRequired)?;
    let session = resolve(&state.registry, id)?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    if !session.attach_stream(tx).await {
        return Err(TransportError::StreamConflict);
    }
    tracing::info!(session_id = %session.id(), "standalone stream opened");

    let stream = SessionEventStream::new(
        rx,
        state.keep_alive,
        session_ended(session.lifecycle(), &state.shutdown),
    );
    let response = (
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(stream),
    )
        .into_response();
    Ok(with_session_header(response, &session))
}

fn handle_delete<H>(state: &HttpState<H>, headers: &HeaderMap) -> Result<Response, TransportError> {
    let id = session_header(headers).ok_or(TransportError::SessionRequired)?;
    resolve(&state.registry, id)?;
    state.registry.remove(id);
    tracing::info!(session_id = %id, "streamable session terminated by client");
    Ok(StatusCode::OK.into_response())
}
