//! Session and transport errors for the streamable dialect.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rmcp::model::ErrorCode;
use serde_json::{json, Value};

use super::session::{SessionId, TransportKind};

/// JSON-RPC code for session-level refusals.
pub const SERVER_ERROR: i32 = -32000;

/// Every way a request can be refused before it reaches the protocol core.
///
/// Rendered as `{jsonrpc: "2.0", error: {code, message}, id: null}`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Bad Request: No valid session ID provided")]
    SessionRequired,
    /// Answered `404` so clients know to start over with `initialize`.
    #[error("Not Found: No valid session ID provided (unknown session)")]
    SessionNotFound(SessionId),
    #[error("Bad Request: Session exists but uses a different transport protocol")]
    TransportMismatch { id: SessionId, actual: TransportKind },
    #[error("Invalid Request: Server already initialized")]
    AlreadyInitialized,
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid Request: {0}")]
    InvalidMessage(serde_json::Error),
    #[error("Invalid Request: empty batch")]
    EmptyBatch,
    #[error("Not Acceptable: Client must accept text/event-stream")]
    NotAcceptable,
    #[error("Conflict: Only one SSE stream is allowed per session")]
    StreamConflict,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Internal server error")]
    Internal,
}

impl TransportError {
    /// HTTP status the refusal is sent with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SessionRequired
            | Self::TransportMismatch { .. }
            | Self::AlreadyInitialized
            | Self::Parse(_)
            | Self::InvalidMessage(_)
            | Self::EmptyBatch => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Self::StreamConflict => StatusCode::CONFLICT,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON-RPC error code of the envelope.
    pub fn code(&self) -> i32 {
        match self {
            Self::AlreadyInitialized | Self::InvalidMessage(_) | Self::EmptyBatch => {
                ErrorCode::INVALID_REQUEST.0
            }
            Self::Parse(_) => ErrorCode::PARSE_ERROR.0,
            Self::Internal => ErrorCode::INTERNAL_ERROR.0,
            _ => SERVER_ERROR,
        }
    }

    /// The JSON-RPC error object sent as the response body, `id` null.
    pub fn envelope(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            },
            "id": null,
        })
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        match &self {
            Self::SessionNotFound(id) | Self::TransportMismatch { id, .. } => {
                tracing::debug!(session_id = %id, error = %self, "rejecting request");
            }
            Self::Internal => tracing::error!("internal transport failure"),
            _ => tracing::debug!(error = %self, "rejecting request"),
        }
        (self.status(), Json(self.envelope())).into_response()
    }
}
