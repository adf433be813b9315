//! Async signaling client over any [`Transport`].
//!
//! [`SignalingClient`] is a thin handle that talks to a background transport
//! loop task via an unbounded MPSC channel. Requests carry a `requestId`; the
//! loop routes each response back to the waiting caller. Unsolicited messages
//! (`pcast.StreamEnded`, `chat.RoomEvent`) are fanned out on a broadcast
//! channel, see [`SignalingChannel::subscribe_events`].
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = connect_somehow().await;
//! let config = SignalingConfig::new("my-application")
//!     .with_authentication_token(token);
//! let client = Arc::new(SignalingClient::start(transport, config));
//!
//! let express = ChannelExpress::new(client.clone(), peer_factory, ChannelExpressConfig::new());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ChannelExpressError, Result};
use crate::protocol::{
    AuthenticateRequest, ChannelDescriptor, ClientMessage, DestroyStreamRequest,
    JoinRoomRequest, JoinRoomResponse, MemberRole, RequestId, ServerMessage, SessionId,
    SetupStreamRequest, StreamRecord, StreamSetup, STATUS_OK,
};
use crate::signaling::{SignalingChannel, SignalingEvent};
use crate::transport::Transport;

/// Default capacity of the signaling event broadcast.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default time to wait for a response.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SignalingClient`].
///
/// # Example
///
/// ```
/// use channel_express::client::SignalingConfig;
/// use std::time::Duration;
///
/// let config = SignalingConfig::new("my-application")
///     .with_authentication_token("token")
///     .with_request_timeout(Duration::from_secs(5));
/// assert_eq!(config.application_id, "my-application");
/// assert!(config.sdk_version.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Application the session authenticates for.
    pub application_id: String,
    /// Token issued by the application backend.
    pub authentication_token: Option<String>,
    /// SDK version string sent during authentication.
    /// Defaults to the crate version at compile time.
    pub sdk_version: Option<String>,
    /// How long [`join_room`](SignalingChannel::join_room) and
    /// [`setup_stream`](SignalingChannel::setup_stream) wait for a response
    /// before failing with [`ChannelExpressError::Timeout`].
    ///
    /// Defaults to **10 seconds**.
    pub request_timeout: Duration,
    /// Capacity of the signaling event broadcast. Subscribers that fall
    /// further behind than this observe a lag.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time [`SignalingClient::shutdown`] gives the transport loop to close
    /// the transport before aborting it.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl SignalingConfig {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            authentication_token: None,
            sdk_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_authentication_token(mut self, token: impl Into<String>) -> Self {
        self.authentication_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

type PendingRequests = HashMap<RequestId, oneshot::Sender<ServerMessage>>;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the client handle and the transport loop.
struct ClientState {
    connected: AtomicBool,
    authenticated: AtomicBool,
    session_id: Mutex<Option<SessionId>>,
    pending: StdMutex<PendingRequests>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            authenticated: AtomicBool::new(false),
            session_id: Mutex::new(None),
            pending: StdMutex::new(HashMap::new()),
        }
    }

    /// Hand `response` to whoever is waiting for it.
    fn complete(&self, response: ServerMessage) {
        let Some(request_id) = response.request_id() else {
            return;
        };
        match lock(&self.pending).remove(&request_id) {
            Some(waiter) => {
                let _ = waiter.send(response);
            }
            None => debug!(%request_id, "response for unknown or expired request"),
        }
    }

    /// Drop every waiter so in-flight requests fail with `NotConnected`.
    fn abandon_pending(&self) {
        let abandoned = std::mem::take(&mut *lock(&self.pending));
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "abandoning in-flight requests");
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Signaling client handle.
///
/// Created via [`SignalingClient::start`], which spawns the transport loop.
/// Share it as `Arc<SignalingClient>`; every method takes `&self`.
pub struct SignalingClient {
    cmd_tx: mpsc::UnboundedSender<ClientMessage>,
    state: Arc<ClientState>,
    events: broadcast::Sender<SignalingEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl SignalingClient {
    /// Start the transport loop over a connected `transport`.
    ///
    /// `pcast.Authenticate` is queued as the very first outgoing message. If
    /// the service rejects it the loop stops and subscribers receive
    /// [`SignalingEvent::Disconnected`].
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(transport: impl Transport, config: SignalingConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let state = Arc::new(ClientState::new());

        let authenticate = ClientMessage::Authenticate(AuthenticateRequest {
            request_id: Uuid::new_v4(),
            application_id: Some(config.application_id),
            authentication_token: config.authentication_token,
            sdk_version: config.sdk_version,
        });
        // Cannot fail: the receiver is alive until the loop below exits.
        let _ = cmd_tx.send(authenticate);

        let task = tokio::spawn(transport_loop(
            transport,
            cmd_rx,
            events.clone(),
            Arc::clone(&state),
            shutdown_rx,
        ));

        Self {
            cmd_tx,
            state,
            events,
            task: Mutex::new(Some(task)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            request_timeout: config.request_timeout,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Close the transport and stop the background task.
    ///
    /// Subscribers receive a final [`SignalingEvent::Disconnected`] unless the
    /// loop has to be aborted after the shutdown timeout. Idempotent.
    pub async fn shutdown(&self) {
        debug!("SignalingClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.lock().await.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
        self.state.abandon_pending();
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the transport loop is running.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Returns `true` once the service accepted authentication.
    pub fn is_authenticated(&self) -> bool {
        self.state.authenticated.load(Ordering::Acquire)
    }

    /// Session id assigned by the service during authentication.
    pub async fn session_id(&self) -> Option<SessionId> {
        self.state.session_id.lock().await.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, msg: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(ChannelExpressError::NotConnected);
        }
        self.cmd_tx
            .send(msg)
            .map_err(|_| ChannelExpressError::NotConnected)
    }

    /// Send `msg` and wait for the response carrying its request id.
    async fn request(&self, request_id: RequestId, msg: ClientMessage) -> Result<ServerMessage> {
        let (tx, rx) = oneshot::channel();
        lock(&self.state.pending).insert(request_id, tx);

        if let Err(e) = self.send(msg) {
            lock(&self.state.pending).remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ChannelExpressError::NotConnected),
            Err(_) => {
                lock(&self.state.pending).remove(&request_id);
                warn!(%request_id, "request timed out");
                Err(ChannelExpressError::Timeout)
            }
        }
    }
}

#[async_trait]
impl SignalingChannel for SignalingClient {
    async fn join_room(&self, descriptor: &ChannelDescriptor) -> Result<JoinRoomResponse> {
        let request_id = Uuid::new_v4();
        let msg = ClientMessage::JoinRoom(JoinRoomRequest {
            request_id,
            alias: descriptor.alias.clone(),
            capabilities: descriptor.capabilities.clone(),
            role: MemberRole::Audience,
        });
        match self.request(request_id, msg).await? {
            ServerMessage::JoinRoomResponse(response) => Ok(*response),
            _ => Err(ChannelExpressError::UnexpectedResponse {
                request: "chat.JoinRoom",
            }),
        }
    }

    async fn setup_stream(
        &self,
        stream: &StreamRecord,
        capabilities: &[String],
    ) -> Result<StreamSetup> {
        let request_id = Uuid::new_v4();
        let msg = ClientMessage::SetupStream(SetupStreamRequest {
            request_id,
            stream_uri: stream.uri.clone(),
            capabilities: capabilities.to_vec(),
        });
        match self.request(request_id, msg).await? {
            ServerMessage::SetupStreamResponse(mut setup) => {
                if setup.session_id.is_none() {
                    setup.session_id = self.session_id().await;
                }
                Ok(setup)
            }
            _ => Err(ChannelExpressError::UnexpectedResponse {
                request: "pcast.SetupStream",
            }),
        }
    }

    async fn destroy_stream(&self, stream_id: &str, reason: &str) -> Result<()> {
        self.send(ClientMessage::DestroyStream(DestroyStreamRequest {
            stream_id: stream_id.to_string(),
            reason: reason.to_string(),
        }))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("connected", &self.is_connected())
            .field("authenticated", &self.is_authenticated())
            .field("pending_requests", &lock(&self.state.pending).len())
            .finish()
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        // No executor to drive a graceful close here; abort the loop instead.
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Background loop multiplexing outgoing requests and incoming messages.
///
/// Exits when the client is shut down or dropped, when the transport closes
/// or fails, or when authentication is rejected.
async fn transport_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    events: broadcast::Sender<SignalingEvent>,
    state: Arc<ClientState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("transport loop started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(msg) = cmd else {
                    debug!("command channel closed, shutting down transport loop");
                    let _ = transport.close().await;
                    emit_disconnected(&events, &state, Some("client shut down".into()));
                    break;
                };
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if let Err(e) = transport.send(json).await {
                            error!("transport send error: {e}");
                            emit_disconnected(&events, &state, Some(format!("transport send error: {e}")));
                            break;
                        }
                    }
                    Err(e) => error!("failed to serialize client message: {e}"),
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                emit_disconnected(&events, &state, Some("client shut down".into()));
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if let Err(reason) = dispatch(&state, &events, msg).await {
                                let _ = transport.close().await;
                                emit_disconnected(&events, &state, Some(reason));
                                break;
                            }
                        }
                        Err(e) => warn!("failed to deserialize server message: {e} (raw: {text})"),
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        emit_disconnected(&events, &state, Some(format!("transport receive error: {e}")));
                        break;
                    }
                    None => {
                        debug!("transport closed by service");
                        emit_disconnected(&events, &state, None);
                        break;
                    }
                }
            }
        }
    }

    state.abandon_pending();
    debug!("transport loop exited");
}

/// Route one incoming message. Returns the disconnect reason if the session
/// cannot continue.
async fn dispatch(
    state: &ClientState,
    events: &broadcast::Sender<SignalingEvent>,
    msg: ServerMessage,
) -> std::result::Result<(), String> {
    match msg {
        ServerMessage::AuthenticateResponse(response) => {
            if response.status != STATUS_OK {
                error!(status = %response.status, "authentication rejected");
                return Err(ChannelExpressError::AuthenticationFailed {
                    status: response.status,
                }
                .to_string());
            }
            info!(session_id = ?response.session_id, "authenticated");
            *state.session_id.lock().await = response.session_id;
            state.authenticated.store(true, Ordering::Release);
        }
        ServerMessage::StreamEnded(ended) => {
            debug!(stream_id = %ended.stream_id, reason = %ended.reason, "stream ended");
            publish(events, SignalingEvent::StreamEnded(ended));
        }
        ServerMessage::RoomEvent(room_event) => {
            debug!(room_id = %room_event.room_id, event_type = ?room_event.event_type, "room event");
            publish(events, SignalingEvent::RoomEvent(room_event));
        }
        response => state.complete(response),
    }
    Ok(())
}

fn publish(events: &broadcast::Sender<SignalingEvent>, event: SignalingEvent) {
    if events.send(event).is_err() {
        debug!("no signaling subscribers, event dropped");
    }
}

fn emit_disconnected(
    events: &broadcast::Sender<SignalingEvent>,
    state: &ClientState,
    reason: Option<String>,
) {
    state.connected.store(false, Ordering::Release);
    state.authenticated.store(false, Ordering::Release);
    publish(events, SignalingEvent::Disconnected { reason });
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio_test::{assert_err, assert_ok};

    type Incoming = Option<std::result::Result<String, ChannelExpressError>>;

    /// Transport driven by the test: the test plays the service.
    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<Incoming>,
        sent: mpsc::UnboundedSender<String>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            let _ = self.sent.send(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.incoming.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Service {
        tx: mpsc::UnboundedSender<Incoming>,
        sent: mpsc::UnboundedReceiver<String>,
        closed: Arc<AtomicBool>,
    }

    impl Service {
        async fn next_sent(&mut self) -> Value {
            let raw = tokio::time::timeout(Duration::from_secs(1), self.sent.recv())
                .await
                .expect("timed out waiting for an outgoing message")
                .expect("transport dropped");
            serde_json::from_str(&raw).unwrap()
        }

        fn reply(&self, message: Value) {
            self.tx.send(Some(Ok(message.to_string()))).unwrap();
        }

        async fn authenticate(&mut self) {
            let auth = self.next_sent().await;
            assert_eq!(auth["type"], "pcast.Authenticate");
            self.reply(json!({
                "type": "pcast.AuthenticateResponse",
                "data": {
                    "requestId": auth["data"]["requestId"],
                    "status": "ok",
                    "sessionId": "mockSessionId"
                }
            }));
        }
    }

    fn start(config: SignalingConfig) -> (Arc<SignalingClient>, Service) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let transport = MockTransport {
            incoming,
            sent: sent_tx,
            closed: Arc::clone(&closed),
        };
        let client = Arc::new(SignalingClient::start(transport, config));
        (client, Service { tx, sent, closed })
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn stream_record() -> StreamRecord {
        serde_json::from_value(json!({ "uri": "pcast://phenixrts.com/streamId", "type": "Presentation" }))
            .unwrap()
    }

    #[test]
    fn config_defaults_and_clamps() {
        let config = SignalingConfig::new("app").with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.authentication_token.is_none());
    }

    #[tokio::test]
    async fn authenticate_is_sent_first() {
        let (_client, mut service) =
            start(SignalingConfig::new("app").with_authentication_token("secret"));
        let auth = service.next_sent().await;
        assert_eq!(auth["type"], "pcast.Authenticate");
        assert_eq!(auth["data"]["applicationId"], "app");
        assert_eq!(auth["data"]["authenticationToken"], "secret");
        assert!(auth["data"]["requestId"].is_string());
    }

    #[tokio::test]
    async fn authentication_records_session_id() {
        let (client, mut service) = start(SignalingConfig::new("app"));
        assert!(!client.is_authenticated());
        service.authenticate().await;

        let probe = Arc::clone(&client);
        wait_until(move || probe.is_authenticated()).await;
        assert_eq!(client.session_id().await.as_deref(), Some("mockSessionId"));
    }

    #[tokio::test]
    async fn join_room_is_answered_by_request_id() {
        let (client, mut service) = start(SignalingConfig::new("app"));
        service.authenticate().await;

        let joiner = Arc::clone(&client);
        let join = tokio::spawn(async move {
            joiner
                .join_room(&ChannelDescriptor::new("ChannelAlias"))
                .await
        });

        let request = service.next_sent().await;
        assert_eq!(request["type"], "chat.JoinRoom");
        assert_eq!(request["data"]["alias"], "ChannelAlias");
        assert_eq!(request["data"]["role"], "Audience");

        // An answer to some other request must not complete this one.
        service.reply(json!({
            "type": "chat.JoinRoomResponse",
            "data": { "requestId": Uuid::new_v4(), "status": "ok" }
        }));
        service.reply(json!({
            "type": "chat.JoinRoomResponse",
            "data": {
                "requestId": request["data"]["requestId"],
                "status": "ok",
                "room": { "roomId": "ChannelId", "alias": "ChannelAlias", "name": "Channel", "type": "Channel" },
                "members": []
            }
        }));

        let response = join.await.unwrap().unwrap();
        assert!(response.is_ok());
        assert_eq!(response.room.unwrap().room_id, "ChannelId");
    }

    #[tokio::test]
    async fn setup_stream_falls_back_to_authenticated_session() {
        let (client, mut service) = start(SignalingConfig::new("app"));
        service.authenticate().await;
        let probe = Arc::clone(&client);
        wait_until(move || probe.is_authenticated()).await;

        let subscriber = Arc::clone(&client);
        let setup = tokio::spawn(async move {
            subscriber
                .setup_stream(&stream_record(), &["streaming".to_string()])
                .await
        });

        let request = service.next_sent().await;
        assert_eq!(request["type"], "pcast.SetupStream");
        assert_eq!(request["data"]["streamUri"], "pcast://phenixrts.com/streamId");
        assert_eq!(request["data"]["capabilities"], json!(["streaming"]));
        service.reply(json!({
            "type": "pcast.SetupStreamResponse",
            "data": { "requestId": request["data"]["requestId"], "status": "ok", "streamId": "mockStreamId" }
        }));

        let setup = setup.await.unwrap().unwrap();
        assert!(setup.is_ok());
        assert_eq!(setup.session_id.as_deref(), Some("mockSessionId"));
    }

    #[tokio::test]
    async fn destroy_stream_is_fire_and_forget() {
        let (client, mut service) = start(SignalingConfig::new("app"));
        let _auth = service.next_sent().await;

        assert_ok!(client.destroy_stream("mockStreamId", "ended").await);
        let request = service.next_sent().await;
        assert_eq!(request["type"], "pcast.DestroyStream");
        assert_eq!(request["data"]["streamId"], "mockStreamId");
        assert_eq!(request["data"]["reason"], "ended");
    }

    #[tokio::test]
    async fn unsolicited_messages_are_broadcast() {
        let (client, service) = start(SignalingConfig::new("app"));
        let mut events = client.subscribe_events();

        service.tx.send(Some(Ok("not json".into()))).unwrap();
        service.reply(json!({
            "type": "pcast.StreamEnded",
            "data": { "streamId": "mockStreamId", "sessionId": "mockSessionId", "reason": "ended" }
        }));

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            SignalingEvent::StreamEnded(ended) => {
                assert_eq!(ended.stream_id, "mockStreamId");
                assert!(ended.reason.is_terminal());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn rejected_authentication_disconnects() {
        let (client, mut service) = start(SignalingConfig::new("app"));
        let mut events = client.subscribe_events();

        let auth = service.next_sent().await;
        service.reply(json!({
            "type": "pcast.AuthenticateResponse",
            "data": { "requestId": auth["data"]["requestId"], "status": "unauthorized" }
        }));

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            SignalingEvent::Disconnected { reason } => {
                assert!(reason.unwrap().contains("unauthorized"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!client.is_connected());
        assert!(service.closed.load(Ordering::Relaxed));

        let err = assert_err!(
            client
                .join_room(&ChannelDescriptor::new("ChannelAlias"))
                .await
        );
        assert!(matches!(err, ChannelExpressError::NotConnected));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let (client, mut service) = start(
            SignalingConfig::new("app").with_request_timeout(Duration::from_millis(50)),
        );
        service.authenticate().await;

        let err = assert_err!(
            client
                .join_room(&ChannelDescriptor::new("ChannelAlias"))
                .await
        );
        assert!(matches!(err, ChannelExpressError::Timeout));
        assert!(lock(&client.state.pending).is_empty());
    }

    #[tokio::test]
    async fn transport_close_fails_in_flight_requests() {
        let (client, mut service) = start(SignalingConfig::new("app"));
        service.authenticate().await;

        let joiner = Arc::clone(&client);
        let join = tokio::spawn(async move {
            joiner
                .join_room(&ChannelDescriptor::new("ChannelAlias"))
                .await
        });
        let _request = service.next_sent().await;
        service.tx.send(None).unwrap();

        let err = join.await.unwrap().unwrap_err();
        assert!(matches!(err, ChannelExpressError::NotConnected));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn shutdown_closes_transport_and_is_idempotent() {
        let (client, service) = start(SignalingConfig::new("app"));
        let mut events = client.subscribe_events();

        client.shutdown().await;
        client.shutdown().await;

        assert!(service.closed.load(Ordering::Relaxed));
        assert!(!client.is_connected());
        assert_eq!(
            events.recv().await.unwrap(),
            SignalingEvent::Disconnected {
                reason: Some("client shut down".into())
            }
        );
        assert!(matches!(
            client.destroy_stream("mockStreamId", "ended").await,
            Err(ChannelExpressError::NotConnected)
        ));
    }
}
