//! Session registry shared by the HTTP transports.
//!
//! Each entry is a [`SessionHandle`], a tagged value whose variant records the
//! dialect the session was created under. Lookups never create entries; only
//! the owning transport's initialisation path calls [`SessionRegistry::put`].

use std::{fmt, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use rmcp::model::{ClientJsonRpcMessage, JsonRpcMessage, RequestId, ServerJsonRpcMessage};
use tokio::sync::{mpsc, oneshot, watch, RwLock};

/// Server-generated session identifier, 32 hex characters.
pub type SessionId = Arc<str>;

/// Which HTTP dialect a session belongs to. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Streamable,
    LegacySse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Streamable => f.write_str("streamable-http"),
            Self::LegacySse => f.write_str("sse"),
        }
    }
}

/// Where a session is in its life. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    Active,
    Closed,
}

/// `Initializing -> Active -> Closed`, observable by streams that must end
/// when their session does.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    fn new(initial: LifecycleState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    /// The state right now.
    pub fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Move `Initializing` to `Active`. A closed session stays closed.
    pub fn activate(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Initializing {
                *state = LifecycleState::Active;
                true
            } else {
                false
            }
        })
    }

    /// Move to `Closed`. Returns `true` only for the call that performed the
    /// transition, so release work runs once.
    pub fn close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Closed {
                false
            } else {
                *state = LifecycleState::Closed;
                true
            }
        })
    }

    /// Resolves once the session is closed.
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.state.subscribe();
        async move {
            // An error means the sender is gone, which only happens after close.
            let _ = rx.wait_for(|state| *state == LifecycleState::Closed).await;
        }
    }
}

/// A session opened by an `initialize` POST on `/mcp`.
///
/// Client messages go to the session's protocol core through `inbound`.
/// Replies come back through [`StreamableSession::route`], which hands each
/// one to the request waiting for that id; everything else the core sends
/// goes to the standalone `GET` stream, if one is attached.
#[derive(Debug)]
pub struct StreamableSession {
    id: SessionId,
    lifecycle: Lifecycle,
    inbound: mpsc::Sender<ClientJsonRpcMessage>,
    pending: DashMap<RequestId, oneshot::Sender<ServerJsonRpcMessage>>,
    standalone: RwLock<Option<mpsc::Sender<ServerJsonRpcMessage>>>,
}

impl StreamableSession {
    /// A new `Initializing` session whose core reads from `inbound`.
    pub fn new(id: SessionId, inbound: mpsc::Sender<ClientJsonRpcMessage>) -> Self {
        Self {
            id,
            lifecycle: Lifecycle::new(LifecycleState::Initializing),
            inbound,
            pending: DashMap::new(),
            standalone: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Lifecycle shared with the session's streams and core.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Send a client request and wait for the core's reply to `id`.
    ///
    /// `None` means the core is gone or the session closed first.
    pub async fn request(
        &self,
        id: RequestId,
        message: ClientJsonRpcMessage,
    ) -> Option<ServerJsonRpcMessage> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        if self.inbound.send(message).await.is_err() {
            self.pending.remove(&id);
            return None;
        }
        let closed = self.lifecycle.closed();
        tokio::select! {
            reply = rx => reply.ok(),
            _ = closed => {
                self.pending.remove(&id);
                None
            }
        }
    }

    /// Send a client notification or response. Nothing comes back.
    pub async fn deliver(&self, message: ClientJsonRpcMessage) -> bool {
        self.inbound.send(message).await.is_ok()
    }

    /// Dispatch one message from the core.
    pub async fn route(&self, message: ServerJsonRpcMessage) {
        if let Some(id) = reply_id(&message) {
            match self.pending.remove(&id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(message);
                }
                None => tracing::debug!(session_id = %self.id, ?id, "reply has no waiting request"),
            }
            return;
        }

        let stream = self.standalone.read().await.clone();
        match stream {
            Some(tx) if tx.send(message).await.is_ok() => {}
            _ => tracing::debug!(session_id = %self.id, "no standalone stream, dropping server message"),
        }
    }

    /// Attach the standalone stream. Refused while another one is live.
    pub async fn attach_stream(&self, tx: mpsc::Sender<ServerJsonRpcMessage>) -> bool {
        let mut slot = self.standalone.write().await;
        if slot.as_ref().is_some_and(|current| !current.is_closed()) {
            return false;
        }
        *slot = Some(tx);
        true
    }

    /// Wake every waiting request with `None`.
    pub fn fail_pending(&self) {
        self.pending.clear();
    }
}

fn reply_id(message: &ServerJsonRpcMessage) -> Option<RequestId> {
    match message {
        JsonRpcMessage::Response(response) => Some(response.id.clone()),
        JsonRpcMessage::Error(error) => Some(error.id.clone()),
        _ => None,
    }
}

/// A session opened by connecting to `/sse`.
///
/// Holds the sending half of the session's inbound queue; replies travel
/// over the event stream, never back through the POST.
#[derive(Debug)]
pub struct LegacySseSession {
    id: SessionId,
    lifecycle: Lifecycle,
    inbound: mpsc::Sender<ClientJsonRpcMessage>,
}

impl LegacySseSession {
    /// A session that is `Active` from the start: opening the stream is the
    /// handshake for this dialect.
    pub fn new(id: SessionId, inbound: mpsc::Sender<ClientJsonRpcMessage>) -> Self {
        Self {
            id,
            lifecycle: Lifecycle::new(LifecycleState::Active),
            inbound,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Queue a client message for the core, preserving arrival order.
    pub async fn enqueue(&self, message: ClientJsonRpcMessage) -> bool {
        self.inbound.send(message).await.is_ok()
    }
}

/// Registry value: one variant per dialect.
#[derive(Debug, Clone)]
pub enum SessionHandle {
    Streamable(Arc<StreamableSession>),
    LegacySse(Arc<LegacySseSession>),
}

impl SessionHandle {
    /// The id the session is registered under.
    pub fn id(&self) -> &SessionId {
        match self {
            Self::Streamable(session) => session.id(),
            Self::LegacySse(session) => session.id(),
        }
    }

    /// The dialect the session was created under.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Streamable(_) => TransportKind::Streamable,
            Self::LegacySse(_) => TransportKind::LegacySse,
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        match self {
            Self::Streamable(session) => session.lifecycle(),
            Self::LegacySse(session) => session.lifecycle(),
        }
    }
}

/// Returned by [`SessionRegistry::put`] when the id is already taken.
#[derive(Debug, thiserror::Error)]
#[error("session {0} is already registered")]
pub struct DuplicateSession(pub SessionId);

/// In-memory map from session id to handle.
///
/// Cheap to clone; clones share the same map. Every operation is a short,
/// synchronous map access, so it is safe to call from `Drop`.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a session up. Never creates one.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Register a session under its own id. Never overwrites.
    pub fn put(&self, handle: SessionHandle) -> Result<(), DuplicateSession> {
        match self.sessions.entry(handle.id().clone()) {
            Entry::Occupied(_) => Err(DuplicateSession(handle.id().clone())),
            Entry::Vacant(slot) => {
                tracing::info!(session_id = %handle.id(), kind = %handle.kind(), "session registered");
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove and close a session. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> Option<SessionHandle> {
        let (_, handle) = self.sessions.remove(id)?;
        handle.lifecycle().close();
        tracing::info!(session_id = %id, kind = %handle.kind(), "session removed");
        Some(handle)
    }

    /// Whether `id` is registered under either dialect.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session, e.g. on server shutdown.
    pub fn close_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove(&id);
        }
    }

    /// Generate an id that is not currently registered.
    pub fn create_id(&self) -> SessionId {
        loop {
            let id = generate_session_id();
            if !self.contains(&id) {
                return id;
            }
        }
    }
}

fn generate_session_id() -> SessionId {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let random: u64 = rand::random();
    Arc::from(format!("{:016x}{:016x}", timestamp, random))
}
