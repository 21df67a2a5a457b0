//! HTTP entry router: binds both HTTP dialects to their paths and owns the
//! session registry they share.

use std::{sync::Arc, time::Duration};

use axum::{
    routing::{any, get, post},
    Router,
};
use rmcp::ServerHandler;
use tokio_util::sync::CancellationToken;

use super::{
    session::SessionRegistry,
    sse,
    stream::KEEP_ALIVE_INTERVAL,
    streamable,
};

/// Streamable dialect endpoint.
pub const MCP_PATH: &str = "/mcp";
/// Legacy push stream.
pub const SSE_PATH: &str = "/sse";
/// Legacy client-message endpoint, advertised in the `endpoint` event.
pub const MESSAGES_PATH: &str = "/messages";

/// Header carrying the session id in the streamable dialect.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// State handed to every handler. Each session gets its own clone of
/// `handler`.
#[derive(Clone)]
pub(crate) struct HttpState<H> {
    pub(crate) registry: SessionRegistry,
    pub(crate) handler: H,
    pub(crate) keep_alive: Duration,
    pub(crate) shutdown: CancellationToken,
    pub(crate) messages_path: Arc<str>,
}

/// HTTP front end for an MCP server handler.
///
/// # Example
///
/// ```rust,ignore
/// use dune_mcp::{McpHttpServer, McpServer};
///
/// let server = McpHttpServer::new(McpServer::new(client));
/// let app = server.router();
/// axum::serve(listener, app)
///     .with_graceful_shutdown(server.shutdown_token().cancelled_owned())
///     .await?;
/// server.shutdown();
/// ```
pub struct McpHttpServer<H> {
    state: HttpState<H>,
}

impl<H> McpHttpServer<H>
where
    H: ServerHandler + Clone,
{
    /// A server with an empty registry and its own shutdown token.
    pub fn new(handler: H) -> Self {
        Self {
            state: HttpState {
                registry: SessionRegistry::new(),
                handler,
                keep_alive: KEEP_ALIVE_INTERVAL,
                shutdown: CancellationToken::new(),
                messages_path: Arc::from(MESSAGES_PATH),
            },
        }
    }

    /// Override the keep-alive spacing on push streams.
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.state.keep_alive = interval;
        self
    }

    /// Share an externally owned shutdown token, e.g. one tied to a signal.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.state.shutdown = token;
        self
    }

    /// Sessions of both dialects, keyed by id.
    pub fn registry(&self) -> &SessionRegistry {
        &self.state.registry
    }

    /// Token that ends every push stream and session core when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Routes for `/mcp`, `/sse` and `/messages`.
    pub fn router(&self) -> Router {
        Router::new()
            .route(MCP_PATH, any(streamable::handle::<H>))
            .route(SSE_PATH, get(sse::open_stream::<H>))
            .route(MESSAGES_PATH, post(sse::post_message::<H>))
            .with_state(self.state.clone())
    }

    /// End every push stream and close every session.
    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
        let open = self.state.registry.len();
        self.state.registry.close_all();
        tracing::info!(closed = open, "HTTP transport shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{
        session::{LifecycleState, SessionHandle},
        test_support::EchoService,
    };
    use axum::{
        body::{to_bytes, Body, BodyDataStream},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn server() -> McpHttpServer<EchoService> {
        McpHttpServer::new(EchoService)
    }

    fn post(uri: &str, session: Option<&str>, body: &Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream");
        if let Some(id) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn with_session(method: &str, session: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(MCP_PATH)
            .header(header::ACCEPT, "text/event-stream")
            .header(MCP_SESSION_ID_HEADER, session)
            .body(Body::empty())
            .unwrap()
    }

    fn messages_uri(id: &str) -> String {
        format!("{MESSAGES_PATH}?sessionId={id}")
    }

    fn initialize_body() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0"}
            }
        })
    }

    fn initialized() -> Value {
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
    }

    fn call(id: u64, tool: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": tool, "arguments": arguments}
        })
    }

    /// The JSON an `echo` call sent back in its text content.
    fn echoed(result: &Value) -> Value {
        serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn initialize(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, None, &initialize_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.headers()[MCP_SESSION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string()
    }

    /// `initialize` followed by `notifications/initialized`.
    async fn handshake(app: &Router) -> String {
        let id = initialize(app).await;
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &initialized()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        id
    }

    /// Next non-comment SSE frame.
    async fn next_event(body: &mut BodyDataStream) -> String {
        loop {
            let chunk = body.next().await.expect("stream ended").unwrap();
            let text = String::from_utf8(chunk.to_vec()).unwrap();
            if !text.starts_with(':') {
                return text;
            }
        }
    }

    fn data_of(event: &str) -> &str {
        event
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap()
    }

    async fn next_message(body: &mut BodyDataStream) -> Value {
        let event = next_event(body).await;
        assert!(event.starts_with("event: message\n"));
        serde_json::from_str(data_of(&event)).unwrap()
    }

    async fn open_legacy(app: &Router) -> (String, BodyDataStream) {
        let response = app
            .clone()
            .oneshot(Request::get(SSE_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let mut body = response.into_body().into_data_stream();
        let endpoint = next_event(&mut body).await;
        assert!(endpoint.starts_with("event: endpoint\n"));
        let id = data_of(&endpoint)
            .strip_prefix("/messages?sessionId=")
            .unwrap()
            .to_string();
        (id, body)
    }

    async fn post_legacy(app: &Router, id: &str, body: &Value) {
        let response = app
            .clone()
            .oneshot(post(&messages_uri(id), None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    /// Open `/sse` and complete the handshake over `/messages`.
    async fn legacy_session(app: &Router) -> (String, BodyDataStream) {
        let (id, mut stream) = open_legacy(app).await;
        post_legacy(app, &id, &initialize_body()).await;
        let reply = next_message(&mut stream).await;
        assert_eq!(reply["id"], json!(0));
        assert!(reply["result"]["protocolVersion"].is_string());
        post_legacy(app, &id, &initialized()).await;
        (id, stream)
    }

    async fn assert_session_error(response: Response, status: StatusCode) {
        assert_eq!(response.status(), status);
        let body = json_body(response).await;
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["error"]["code"], json!(-32000));
    }

    async fn assert_invalid_request(response: Response) {
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn initialize_registers_one_new_session() {
        let server = server();
        let app = server.router();
        assert!(server.registry().is_empty());

        let first = initialize(&app).await;
        assert_eq!(server.registry().len(), 1);
        match server.registry().get(&first) {
            Some(SessionHandle::Streamable(session)) => {
                assert_eq!(session.lifecycle().current(), LifecycleState::Active)
            }
            other => panic!("expected streamable session, got {other:?}"),
        }

        let second = initialize(&app).await;
        assert_ne!(first, second);
        assert_eq!(server.registry().len(), 2);
    }

    #[tokio::test]
    async fn same_id_resolves_to_same_session_instance() {
        let server = server();
        let app = server.router();
        let id = handshake(&app).await;

        let Some(SessionHandle::Streamable(a)) = server.registry().get(&id) else {
            panic!("missing session");
        };
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &call(1, "echo", json!({}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let Some(SessionHandle::Streamable(b)) = server.registry().get(&id) else {
            panic!("missing session");
        };
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn initialize_call_delete_round_trip() {
        let server = server();
        let app = server.router();
        let baseline = server.registry().len();

        let id = handshake(&app).await;

        let request = call(2, "echo", json!({"chain": "ethereum"}));
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[MCP_SESSION_ID_HEADER], id.as_str());
        let body = json_body(response).await;
        assert_eq!(body["id"], json!(2));
        assert_eq!(echoed(&body["result"]), json!({"chain": "ethereum"}));

        let response = app
            .clone()
            .oneshot(with_session("DELETE", &id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(server.registry().len(), baseline);

        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &request))
            .await
            .unwrap();
        assert_session_error(response, StatusCode::NOT_FOUND).await;
    }

    #[tokio::test]
    async fn sessionless_non_initialize_is_rejected() {
        let server = server();
        let response = server
            .router()
            .oneshot(post(MCP_PATH, None, &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})))
            .await
            .unwrap();
        assert_session_error(response, StatusCode::BAD_REQUEST).await;
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn malformed_initialize_creates_nothing() {
        let server = server();
        let response = server
            .router()
            .oneshot(post(MCP_PATH, None, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn unknown_session_id_is_not_adopted() {
        let server = server();
        let response = server
            .router()
            .oneshot(post(MCP_PATH, Some("forged"), &initialize_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], json!(-32000));
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("No valid session ID provided"));
        assert!(server.registry().get("forged").is_none());
    }

    #[tokio::test]
    async fn legacy_id_on_streamable_endpoint_is_a_mismatch() {
        let server = server();
        let app = server.router();
        let (legacy_id, _stream) = open_legacy(&app).await;
        assert_eq!(server.registry().len(), 1);

        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&legacy_id), &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
            .await
            .unwrap();
        assert_session_error(response, StatusCode::BAD_REQUEST).await;

        let response = app
            .clone()
            .oneshot(with_session("DELETE", &legacy_id))
            .await
            .unwrap();
        assert_session_error(response, StatusCode::BAD_REQUEST).await;

        assert_eq!(server.registry().len(), 1);
        assert!(matches!(
            server.registry().get(&legacy_id),
            Some(SessionHandle::LegacySse(_))
        ));
    }

    #[tokio::test]
    async fn streamable_id_on_messages_endpoint_is_rejected() {
        let server = server();
        let app = server.router();
        let id = initialize(&app).await;

        let response = app
            .clone()
            .oneshot(post(
                &messages_uri(&id),
                None,
                &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(server.registry().len(), 1);
    }

    #[tokio::test]
    async fn invalid_json_is_a_parse_error() {
        let request = Request::post(MCP_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], json!(-32700));
    }

    #[tokio::test]
    async fn json_that_is_not_a_message_is_invalid_request() {
        let server = server();
        let app = server.router();

        let response = app
            .clone()
            .oneshot(post(MCP_PATH, None, &json!({"hello": "world"})))
            .await
            .unwrap();
        assert_invalid_request(response).await;

        let id = initialize(&app).await;
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &json!(42)))
            .await
            .unwrap();
        assert_invalid_request(response).await;
        assert_eq!(server.registry().len(), 1);
    }

    #[tokio::test]
    async fn batch_of_requests_gets_an_array_of_replies() {
        let server = server();
        let app = server.router();
        let id = handshake(&app).await;

        let batch = json!([
            call(1, "echo", json!({"n": 1})),
            call(2, "echo", json!({"n": 2})),
        ]);
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &batch))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let replies = body.as_array().unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], json!(1));
        assert_eq!(echoed(&replies[0]["result"]), json!({"n": 1}));
        assert_eq!(replies[1]["id"], json!(2));
        assert_eq!(echoed(&replies[1]["result"]), json!({"n": 2}));
    }

    #[tokio::test]
    async fn batch_entries_are_judged_one_by_one() {
        let server = server();
        let app = server.router();
        let id = initialize(&app).await;

        // Notifications alone produce no body.
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &json!([initialized()])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let batch = json!([call(3, "echo", json!({})), {"hello": "world"}]);
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &batch))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let replies = body.as_array().unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], json!(3));
        assert_eq!(replies[1]["error"]["code"], json!(-32600));
        assert_eq!(replies[1]["id"], Value::Null);

        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &json!([])))
            .await
            .unwrap();
        assert_invalid_request(response).await;
    }

    #[tokio::test]
    async fn batch_without_session_is_rejected() {
        let server = server();
        let response = server
            .router()
            .oneshot(post(MCP_PATH, None, &json!([initialize_body()])))
            .await
            .unwrap();
        assert_session_error(response, StatusCode::BAD_REQUEST).await;
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn core_error_is_returned_as_reply() {
        let server = server();
        let app = server.router();
        let id = handshake(&app).await;
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &call(4, "fail", json!({}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], json!(4));
        assert_eq!(body["error"]["code"], json!(-32603));
        assert_eq!(body["error"]["message"], "requested failure");
        assert_eq!(server.registry().len(), 1);
    }

    #[tokio::test]
    async fn notification_is_accepted_without_body() {
        let server = server();
        let app = server.router();
        let id = initialize(&app).await;
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &initialized()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn second_initialize_on_session_is_rejected() {
        let server = server();
        let app = server.router();
        let id = handshake(&app).await;
        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &initialize_body()))
            .await
            .unwrap();
        assert_invalid_request(response).await;
        assert_eq!(server.registry().len(), 1);
    }

    #[tokio::test]
    async fn standalone_stream_carries_notifications_and_ends_on_delete() {
        let server = server();
        let app = server.router();
        let id = handshake(&app).await;

        let refused = Request::get(MCP_PATH)
            .header(MCP_SESSION_ID_HEADER, id.as_str())
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(refused).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

        let response = app.clone().oneshot(with_session("GET", &id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut stream = response.into_body().into_data_stream();

        let response = app.clone().oneshot(with_session("GET", &id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(post(MCP_PATH, Some(&id), &call(5, "notify", json!({}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let message = next_message(&mut stream).await;
        assert_eq!(message["method"], "notifications/tools/list_changed");

        let response = app.clone().oneshot(with_session("DELETE", &id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn unsupported_method_is_rejected() {
        let request = Request::put(MCP_PATH).body(Body::empty()).unwrap();
        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn legacy_stream_round_trip_and_disconnect() {
        let server = server();
        let app = server.router();
        let (id, mut stream) = legacy_session(&app).await;
        assert!(matches!(
            server.registry().get(&id),
            Some(SessionHandle::LegacySse(_))
        ));

        let request = call(11, "echo", json!({"ok": true}));
        let response = app
            .clone()
            .oneshot(post(&messages_uri("wrong-id"), None, &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        post_legacy(&app, &id, &request).await;
        let message = next_message(&mut stream).await;
        assert_eq!(message["id"], json!(11));
        assert_eq!(echoed(&message["result"]), json!({"ok": true}));

        drop(stream);
        assert!(server.registry().is_empty());

        let response = app
            .clone()
            .oneshot(post(&messages_uri(&id), None, &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn legacy_core_error_arrives_as_event_and_stream_stays_open() {
        let server = server();
        let app = server.router();
        let (id, mut stream) = legacy_session(&app).await;

        post_legacy(&app, &id, &call(1, "fail", json!({}))).await;
        let failed = next_message(&mut stream).await;
        assert_eq!(failed["id"], json!(1));
        assert_eq!(failed["error"]["code"], json!(-32603));

        post_legacy(&app, &id, &call(2, "echo", json!({"after": "failure"}))).await;
        let answered = next_message(&mut stream).await;
        assert_eq!(answered["id"], json!(2));
        assert_eq!(echoed(&answered["result"]), json!({"after": "failure"}));
        assert!(server.registry().contains(&id));
    }

    #[tokio::test]
    async fn malformed_legacy_message_is_rejected() {
        let server = server();
        let app = server.router();
        let (id, _stream) = open_legacy(&app).await;
        let response = app
            .clone()
            .oneshot(post(&messages_uri(&id), None, &json!({"hello": "world"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(server.registry().contains(&id));
    }

    #[tokio::test]
    async fn messages_without_session_id_are_rejected() {
        let response = server()
            .router()
            .oneshot(post(MESSAGES_PATH, None, &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn legacy_messages_are_all_answered() {
        let server = server();
        let app = server.router();
        let (id, mut stream) = legacy_session(&app).await;

        for n in 1..=5 {
            post_legacy(&app, &id, &call(n, "echo", json!({"n": n}))).await;
        }
        let mut answered = Vec::new();
        for _ in 0..5 {
            let message = next_message(&mut stream).await;
            answered.push(message["id"].as_u64().unwrap());
        }
        answered.sort_unstable();
        assert_eq!(answered, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_stream_sends_keep_alive() {
        let server = server();
        let app = server.router();
        let (_id, mut stream) = open_legacy(&app).await;

        let start = tokio::time::Instant::now();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b": keep-alive\n\n");
        assert_eq!(start.elapsed(), KEEP_ALIVE_INTERVAL);
    }

    #[tokio::test]
    async fn shutdown_closes_streams_and_sessions() {
        let server = server();
        let app = server.router();
        let (_legacy, mut stream) = open_legacy(&app).await;
        initialize(&app).await;
        assert_eq!(server.registry().len(), 2);

        server.shutdown();
        assert!(server.registry().is_empty());
        assert!(stream.next().await.is_none());
    }
}
