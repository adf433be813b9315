#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test doubles for the channel express integration tests.
//!
//! - [`MockTransport`]: a transport that answers requests through a responder
//!   closure and lets tests push unsolicited messages.
//! - [`MockSignaling`]: an in-memory [`SignalingChannel`] with scripted joins.
//! - [`MockPeer`] / [`MockPeerFactory`]: controllable peer connections.
//! - [`StubMonitorFactory`]: monitors whose verdicts are scripted per stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use channel_express::monitor::{MonitorSink, MonitorVerdict};
use channel_express::protocol::{
    stream_uri, ChannelDescriptor, JoinRoomResponse, MemberRecord, MemberRole, MemberState,
    RoomInfo, RoomType, StreamEndedEvent, StreamRecord, StreamSetup, StreamType,
};
use channel_express::{
    ChannelEvent, ChannelEvents, ChannelExpressError, MonitorFactory, MonitorOptions, PeerConnection,
    PeerConnectionFactory, PeerConnectionMonitor, PeerConnectionState, SignalingChannel,
    SignalingEvent, StreamEndReason, TrafficStats, Transport,
};

pub const SESSION_ID: &str = "mockSessionId";
pub const STREAM_ID: &str = "mockStreamId";
pub const ROOM_ID: &str = "ChannelId";
pub const ALIAS: &str = "ChannelAlias";

/// Stream id handed out by the n-th (1-based) stream setup.
pub fn stream_id_for(setup: usize) -> String {
    if setup <= 1 {
        STREAM_ID.to_string()
    } else {
        format!("{STREAM_ID}{setup}")
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn channel_room() -> RoomInfo {
    RoomInfo {
        room_id: ROOM_ID.into(),
        alias: ALIAS.into(),
        name: "Channel".into(),
        description: "Channel".into(),
        room_type: RoomType::Channel,
    }
}

pub fn presenter_stream() -> StreamRecord {
    StreamRecord {
        uri: stream_uri("streamId"),
        stream_type: StreamType::Presentation,
        audio_state: Default::default(),
        video_state: Default::default(),
    }
}

pub fn presenter() -> MemberRecord {
    MemberRecord {
        session_id: "presenterSessionId".into(),
        screen_name: "Presenter".into(),
        role: MemberRole::Presenter,
        state: MemberState::Active,
        streams: vec![presenter_stream()],
        last_update: 1_700_000_000_000,
    }
}

pub fn audience(session_id: &str) -> MemberRecord {
    MemberRecord {
        session_id: session_id.into(),
        screen_name: "Viewer".into(),
        role: MemberRole::Audience,
        state: MemberState::Passive,
        streams: Vec::new(),
        last_update: 1_700_000_000_000,
    }
}

pub fn join_response(status: &str, members: Vec<MemberRecord>) -> JoinRoomResponse {
    JoinRoomResponse {
        request_id: uuid::Uuid::new_v4(),
        status: status.into(),
        room: Some(channel_room()),
        members,
    }
}

pub fn stream_ended(stream_id: &str, reason: &str) -> SignalingEvent {
    SignalingEvent::StreamEnded(StreamEndedEvent {
        stream_id: stream_id.into(),
        session_id: SESSION_ID.into(),
        reason: StreamEndReason::from(reason),
    })
}

/// Wait for the next event, failing the test after one second.
pub async fn next_event(events: &mut ChannelEvents) -> Option<ChannelEvent> {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for a channel event")
}

/// Collect status names of events until the channel closes or stays quiet
/// for `quiet`.
pub async fn collect_statuses(
    events: &mut ChannelEvents,
    quiet: Duration,
) -> Vec<&'static str> {
    let mut statuses = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(quiet, events.recv()).await {
        if let Some(status) = event.status() {
            statuses.push(status.as_str());
        }
    }
    statuses
}

pub fn descriptor() -> ChannelDescriptor {
    ChannelDescriptor::new(ALIAS).with_capabilities(["real-time"])
}

// ── MockTransport ───────────────────────────────────────────────────

type Incoming = Option<Result<String, ChannelExpressError>>;
type Responder = Box<dyn FnMut(&Value) -> Option<Value> + Send>;

/// Transport whose "service" is a responder closure.
///
/// Every outgoing message is parsed, recorded and handed to the responder;
/// whatever it returns is queued for `recv`. Tests push unsolicited messages
/// through [`ServiceHandle::push`].
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    loopback: mpsc::UnboundedSender<Incoming>,
    responder: Responder,
    sent: Arc<StdMutex<Vec<Value>>>,
    closed: Arc<AtomicBool>,
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::UnboundedSender<Incoming>,
    pub sent: Arc<StdMutex<Vec<Value>>>,
    pub closed: Arc<AtomicBool>,
}

impl ServiceHandle {
    pub fn push(&self, message: Value) {
        self.tx.send(Some(Ok(message.to_string()))).unwrap();
    }

    pub fn push_raw(&self, item: Incoming) {
        self.tx.send(item).unwrap();
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|message| message["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

impl MockTransport {
    pub fn new(
        responder: impl FnMut(&Value) -> Option<Value> + Send + 'static,
    ) -> (Self, ServiceHandle) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming,
            loopback: tx.clone(),
            responder: Box::new(responder),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, ServiceHandle { tx, sent, closed })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ChannelExpressError> {
        let parsed: Value = serde_json::from_str(&message).unwrap();
        let reply = (self.responder)(&parsed);
        self.sent.lock().unwrap().push(parsed);
        if let Some(reply) = reply {
            let _ = self.loopback.send(Some(Ok(reply.to_string())));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelExpressError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ChannelExpressError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Responder playing a healthy service with one presenter on the channel.
pub fn channel_service() -> impl FnMut(&Value) -> Option<Value> + Send + 'static {
    let mut setups = 0usize;
    move |message| {
        let request_id = message["data"]["requestId"].clone();
        match message["type"].as_str()? {
            "pcast.Authenticate" => Some(json!({
                "type": "pcast.AuthenticateResponse",
                "data": { "requestId": request_id, "status": "ok", "sessionId": SESSION_ID }
            })),
            "chat.JoinRoom" => Some(json!({
                "type": "chat.JoinRoomResponse",
                "data": {
                    "requestId": request_id,
                    "status": "ok",
                    "room": channel_room(),
                    "members": [presenter(), audience(SESSION_ID)]
                }
            })),
            "pcast.SetupStream" => {
                setups += 1;
                Some(json!({
                    "type": "pcast.SetupStreamResponse",
                    "data": { "requestId": request_id, "status": "ok", "streamId": stream_id_for(setups) }
                }))
            }
            _ => None,
        }
    }
}

// ── MockSignaling ───────────────────────────────────────────────────

/// Scripted outcome of one `join_room` call.
#[derive(Debug, Clone)]
pub enum JoinScript {
    /// `ok` with a presenter publishing.
    Presenter,
    /// `ok` with nobody publishing.
    NoPresenter,
    /// A non-ok status.
    Rejected(String),
    /// No response at all.
    TransportError,
    /// Wait, then behave like the inner script.
    Delayed(Duration, Box<JoinScript>),
}

/// In-memory signaling service.
pub struct MockSignaling {
    scripts: StdMutex<VecDeque<JoinScript>>,
    joins: AtomicUsize,
    setups: AtomicUsize,
    destroyed: StdMutex<Vec<(String, String)>>,
    setup_capabilities: StdMutex<Vec<Vec<String>>>,
    events: broadcast::Sender<SignalingEvent>,
}

impl MockSignaling {
    /// Every join succeeds with a presenter unless scripted otherwise.
    pub fn new() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    /// Joins follow `scripts` in order, then fall back to [`JoinScript::Presenter`].
    pub fn scripted(scripts: Vec<JoinScript>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            scripts: StdMutex::new(scripts.into()),
            joins: AtomicUsize::new(0),
            setups: AtomicUsize::new(0),
            destroyed: StdMutex::new(Vec::new()),
            setup_capabilities: StdMutex::new(Vec::new()),
            events,
        })
    }

    pub fn emit(&self, event: SignalingEvent) {
        let _ = self.events.send(event);
    }

    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn setup_count(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    /// `(stream_id, reason)` of every destroyed stream, in order.
    pub fn destroyed(&self) -> Vec<(String, String)> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn setup_capabilities(&self) -> Vec<Vec<String>> {
        self.setup_capabilities.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    async fn join_room(
        &self,
        descriptor: &ChannelDescriptor,
    ) -> Result<JoinRoomResponse, ChannelExpressError> {
        assert_eq!(descriptor.alias, ALIAS);
        self.joins.fetch_add(1, Ordering::SeqCst);
        let mut script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JoinScript::Presenter);
        loop {
            match script {
                JoinScript::Delayed(delay, next) => {
                    tokio::time::sleep(delay).await;
                    script = *next;
                }
                JoinScript::Presenter => {
                    return Ok(join_response("ok", vec![presenter(), audience(SESSION_ID)]));
                }
                JoinScript::NoPresenter => {
                    return Ok(join_response("ok", vec![audience(SESSION_ID)]));
                }
                JoinScript::Rejected(status) => return Ok(join_response(&status, Vec::new())),
                JoinScript::TransportError => return Err(ChannelExpressError::Timeout),
            }
        }
    }

    async fn setup_stream(
        &self,
        stream: &StreamRecord,
        capabilities: &[String],
    ) -> Result<StreamSetup, ChannelExpressError> {
        assert_eq!(stream.uri, presenter_stream().uri);
        self.setup_capabilities
            .lock()
            .unwrap()
            .push(capabilities.to_vec());
        let setup = self.setups.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StreamSetup {
            request_id: uuid::Uuid::new_v4(),
            status: "ok".into(),
            stream_id: Some(stream_id_for(setup)),
            session_id: Some(SESSION_ID.into()),
        })
    }

    async fn destroy_stream(&self, stream_id: &str, reason: &str) -> Result<(), ChannelExpressError> {
        self.destroyed
            .lock()
            .unwrap()
            .push((stream_id.to_string(), reason.to_string()));
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }
}

// ── Peers ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockPeer {
    state: StdMutex<PeerConnectionState>,
    bytes: AtomicUsize,
    closes: AtomicUsize,
}

impl MockPeer {
    pub fn set_state(&self, state: PeerConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn receive(&self, bytes: usize) {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl PeerConnection for MockPeer {
    fn state(&self) -> PeerConnectionState {
        *self.state.lock().unwrap()
    }

    fn traffic(&self) -> TrafficStats {
        let bytes = self.bytes.load(Ordering::SeqCst) as u64;
        TrafficStats {
            bytes_received: bytes,
            packets_received: bytes / 1000,
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.set_state(PeerConnectionState::Closed);
    }
}

/// Hands out a new [`MockPeer`] per stream and remembers them.
#[derive(Default)]
pub struct MockPeerFactory {
    peers: StdMutex<Vec<(String, Arc<MockPeer>)>>,
    failures: AtomicUsize,
}

impl MockPeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn peers(&self) -> Vec<(String, Arc<MockPeer>)> {
        self.peers.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn connect(
        &self,
        stream_id: &str,
        _stream: &StreamRecord,
    ) -> Result<Arc<dyn PeerConnection>, ChannelExpressError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChannelExpressError::PeerConnection("ice failed".into()));
        }
        let peer = Arc::new(MockPeer::default());
        peer.set_state(PeerConnectionState::Connecting);
        self.peers
            .lock()
            .unwrap()
            .push((stream_id.to_string(), Arc::clone(&peer)));
        Ok(peer)
    }
}

// ── Monitors ────────────────────────────────────────────────────────

/// What a stub monitor reports for its stream.
#[derive(Debug, Clone, Copy)]
pub enum StubBehavior {
    /// Reports nothing.
    Silent,
    /// Reports active, then healthy.
    ActiveHealthy,
    /// Reports `verdict` after the delay without ever becoming active.
    FailAfter(Duration, MonitorVerdict),
    /// Reports active, then `verdict` after the delay.
    ActiveThenFail(Duration, MonitorVerdict),
}

type BehaviorFn = dyn Fn(usize) -> StubBehavior + Send + Sync;

/// Creates monitors whose behavior depends on their creation index (0-based).
pub struct StubMonitorFactory {
    behavior: Arc<BehaviorFn>,
    created: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

impl StubMonitorFactory {
    pub fn new(behavior: impl Fn(usize) -> StubBehavior + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            behavior: Arc::new(behavior),
            created: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MonitorFactory for StubMonitorFactory {
    fn create(&self) -> Box<dyn PeerConnectionMonitor> {
        let index = self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(StubMonitor {
            behavior: (self.behavior)(index),
            stopped: Arc::clone(&self.stopped),
            task: None,
        })
    }
}

struct StubMonitor {
    behavior: StubBehavior,
    stopped: Arc<AtomicUsize>,
    task: Option<JoinHandle<()>>,
}

impl PeerConnectionMonitor for StubMonitor {
    fn start(&mut self, _peer: Arc<dyn PeerConnection>, _options: MonitorOptions, sink: MonitorSink) {
        let behavior = self.behavior;
        self.task = Some(tokio::spawn(async move {
            match behavior {
                StubBehavior::Silent => {}
                StubBehavior::ActiveHealthy => {
                    sink.active();
                    sink.verdict(MonitorVerdict::Healthy);
                }
                StubBehavior::FailAfter(delay, verdict) => {
                    tokio::time::sleep(delay).await;
                    sink.verdict(verdict);
                }
                StubBehavior::ActiveThenFail(delay, verdict) => {
                    sink.active();
                    tokio::time::sleep(delay).await;
                    sink.verdict(verdict);
                }
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}
