//! Shared-secret authentication for the HTTP surface.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use serde_json::json;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

const DEFAULT_REALM: &str = "dune-mcp";

/// Layer that requires `AUTH_TOKEN` on every request.
///
/// # Example
///
/// ```rust,ignore
/// use dune_mcp::{McpHttpServer, TokenAuthLayer};
///
/// let app = server.router().layer(TokenAuthLayer::new(config.auth_token.clone()?));
/// ```
#[derive(Clone)]
pub struct TokenAuthLayer {
    token: Arc<str>,
    realm: Arc<str>,
}

impl TokenAuthLayer {
    /// Require `token`, challenging with the default realm.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_realm(token, DEFAULT_REALM)
    }

    pub fn with_realm(token: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
            realm: Arc::from(realm.into()),
        }
    }
}

impl<S> Layer<S> for TokenAuthLayer {
    type Service = TokenAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TokenAuthService {
            inner,
            token: self.token.clone(),
            realm: self.realm.clone(),
        }
    }
}

/// Accepts `Authorization: Bearer <token>` or Basic auth with any username
/// and the token as password.
#[derive(Clone)]
pub struct TokenAuthService<S> {
    inner: S,
    token: Arc<str>,
    realm: Arc<str>,
}

impl<S> Service<Request<Body>> for TokenAuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if authorized(req.headers(), &self.token) {
            // Take the readied service, leave a fresh clone behind.
            let clone = self.inner.clone();
            let mut inner = std::mem::replace(&mut self.inner, clone);
            return Box::pin(async move { inner.call(req).await });
        }

        tracing::warn!(method = %req.method(), uri = %req.uri(), "rejected unauthenticated request");
        let response = unauthorized(&self.realm);
        Box::pin(async move { Ok(response) })
    }
}

fn authorized(headers: &HeaderMap, token: &str) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };

    if let Some(bearer) = value.strip_prefix("Bearer ") {
        return bearer == token;
    }
    if let Some(credentials) = value.strip_prefix("Basic ") {
        return base64::engine::general_purpose::STANDARD
            .decode(credentials.trim())
            .ok()
            .and_then(|decoded| String::from_utf8(decoded).ok())
            .and_then(|decoded| {
                decoded
                    .split_once(':')
                    .map(|(_user, password)| password == token)
            })
            .unwrap_or(false);
    }
    false
}

fn unauthorized(realm: &str) -> Response {
    let challenge = HeaderValue::from_str(&format!("Bearer, Basic realm=\"{realm}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("Bearer, Basic"));
    let envelope = json!({
        "jsonrpc": "2.0",
        "error": {"code": -32000, "message": "Unauthorized"},
        "id": null,
    });
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(envelope),
    )
        .into_response()
}
