//! Peer connection health monitoring.
//!
//! A [`PeerConnectionMonitor`] watches one peer connection and reports through
//! a [`MonitorSink`]:
//!
//! - [`MonitorSink::active`] once, when the connection is first established;
//! - [`MonitorSink::verdict`] whenever its classification changes.
//!
//! The sink enforces the reporting rules for every implementation: repeated
//! verdicts are swallowed, and once a failure has been reported nothing else
//! gets through until a new sink is handed out by a fresh `start`.
//!
//! Monitors are created through a [`MonitorFactory`] injected into
//! [`ChannelExpress`](crate::express::ChannelExpress), so tests can substitute
//! scripted monitors for the default [`PollingMonitor`].

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::peer::{PeerConnection, PeerConnectionState, TrafficStats};

/// Default interval between two polls of the peer connection.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default time a connection may stay `disconnected` before it counts as failed.
const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Default time a connected stream may go without receiving data.
const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(10);

/// Default time allowed for the first connection to be established.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Smallest accepted poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ── Verdicts ────────────────────────────────────────────────────────

/// Health classification of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorVerdict {
    /// Media is flowing.
    Healthy,
    /// The local side stopped receiving media (stall, timeout, lingering disconnect).
    ClientSideFailure,
    /// The connection itself failed or was closed underneath us.
    PeerFailure,
}

impl MonitorVerdict {
    /// Returns `true` for the verdicts that trigger a rejoin.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Wire-style name of the verdict.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::ClientSideFailure => "client-side-failure",
            Self::PeerFailure => "peer-failure",
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Healthy => 1,
            Self::ClientSideFailure => 2,
            Self::PeerFailure => 3,
        }
    }
}

/// A verdict together with the instant it was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerdictReport {
    pub verdict: MonitorVerdict,
    pub at: Instant,
}

/// What a monitor tells its subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    /// The connection has been established for the first time.
    Active,
    /// The classification changed.
    Verdict(VerdictReport),
}

// ── Sink ────────────────────────────────────────────────────────────

/// Generation-tagged signal as queued for a subscription.
pub(crate) type MonitorMessage = (u64, MonitorSignal);

const NO_VERDICT: u8 = 0;

#[derive(Debug)]
struct SinkState {
    last_verdict: AtomicU8,
    active: AtomicBool,
}

/// Where a monitor delivers its signals. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MonitorSink {
    generation: u64,
    tx: mpsc::UnboundedSender<MonitorMessage>,
    state: Arc<SinkState>,
}

impl MonitorSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<MonitorMessage>) -> Self {
        Self {
            generation,
            tx,
            state: Arc::new(SinkState {
                last_verdict: AtomicU8::new(NO_VERDICT),
                active: AtomicBool::new(false),
            }),
        }
    }

    /// Create a sink that is not attached to a subscription, returning the
    /// receiving end. Useful for exercising a monitor on its own.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<(u64, MonitorSignal)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(0, tx), rx)
    }

    /// Report that the connection has been established.
    ///
    /// Returns `true` if the signal was forwarded (first call only, and only
    /// before any failure).
    pub fn active(&self) -> bool {
        if self.has_failed() || self.state.active.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.forward(MonitorSignal::Active)
    }

    /// Report a verdict.
    ///
    /// Returns `true` if the verdict was forwarded. Repeats of the previous
    /// verdict and anything after a failure are dropped.
    pub fn verdict(&self, verdict: MonitorVerdict) -> bool {
        let next = verdict.code();
        let swapped =
            self.state
                .last_verdict
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                    if prev == next || prev >= MonitorVerdict::ClientSideFailure.code() {
                        None
                    } else {
                        Some(next)
                    }
                });
        if swapped.is_err() {
            return false;
        }
        self.forward(MonitorSignal::Verdict(VerdictReport {
            verdict,
            at: Instant::now(),
        }))
    }

    /// Returns `true` once a failure verdict went through this sink.
    pub fn has_failed(&self) -> bool {
        self.state.last_verdict.load(Ordering::Acquire) >= MonitorVerdict::ClientSideFailure.code()
    }

    /// Returns `true` if the receiving subscription is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn forward(&self, signal: MonitorSignal) -> bool {
        self.tx.send((self.generation, signal)).is_ok()
    }
}

// ── Options ─────────────────────────────────────────────────────────

/// Tuning for [`PollingMonitor`].
///
/// # Example
///
/// ```
/// use channel_express::monitor::MonitorOptions;
/// use std::time::Duration;
///
/// let options = MonitorOptions::new()
///     .with_poll_interval(Duration::from_millis(250))
///     .with_stall_threshold(Duration::ZERO); // disable stall detection
/// assert_eq!(options.poll_interval, Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Interval between polls. Clamped to at least 10ms.
    pub poll_interval: Duration,
    /// How long `disconnected` may last before it is a client-side failure.
    pub disconnect_grace: Duration,
    /// How long a connected stream may receive no bytes before it is a
    /// client-side failure. `Duration::ZERO` disables the check.
    pub stall_threshold: Duration,
    /// How long the first connection may take to establish.
    pub connect_timeout: Duration,
}

impl MonitorOptions {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    #[must_use]
    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    #[must_use]
    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ── Monitor trait and factory ───────────────────────────────────────

/// Observes one peer connection.
pub trait PeerConnectionMonitor: Send + 'static {
    /// Begin observing `peer`. Calling `start` on a running monitor restarts it.
    fn start(&mut self, peer: Arc<dyn PeerConnection>, options: MonitorOptions, sink: MonitorSink);

    /// Stop observing. Idempotent.
    fn stop(&mut self);
}

/// Produces a fresh monitor for every installed stream.
pub trait MonitorFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn PeerConnectionMonitor>;
}

/// Factory for [`PollingMonitor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PollingMonitorFactory;

impl MonitorFactory for PollingMonitorFactory {
    fn create(&self) -> Box<dyn PeerConnectionMonitor> {
        Box::new(PollingMonitor::new())
    }
}

// ── Polling monitor ─────────────────────────────────────────────────

/// Polls connection state and traffic counters on a fixed interval.
///
/// Classification per poll:
///
/// | observation | verdict |
/// |---|---|
/// | `failed` or `closed` | peer failure |
/// | `disconnected` longer than the grace period | client-side failure |
/// | never connected within the connect timeout | client-side failure |
/// | connected, no new bytes for the stall threshold | client-side failure |
/// | connected | healthy |
///
/// The poll task ends after the first failure verdict.
#[derive(Debug, Default)]
pub struct PollingMonitor {
    task: Option<JoinHandle<()>>,
}

impl PollingMonitor {
    pub fn new() -> Self {
        Self { task: None }
    }

    /// Returns `true` while the poll task is running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl PeerConnectionMonitor for PollingMonitor {
    fn start(&mut self, peer: Arc<dyn PeerConnection>, options: MonitorOptions, sink: MonitorSink) {
        self.stop();
        self.task = Some(tokio::spawn(poll_loop(peer, options, sink)));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollingMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(peer: Arc<dyn PeerConnection>, options: MonitorOptions, sink: MonitorSink) {
    let mut ticker = tokio::time::interval(options.poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut classifier = Classifier::new(Instant::now());

    loop {
        ticker.tick().await;
        if sink.is_closed() {
            debug!("monitor sink closed, stopping poll loop");
            return;
        }

        let state = peer.state();
        let observation = classifier.observe(state, peer.traffic(), Instant::now(), &options);
        if observation.became_active {
            sink.active();
        }
        if let Some(verdict) = observation.verdict {
            if verdict.is_failure() {
                warn!(%state, verdict = verdict.as_str(), "peer connection unhealthy");
                sink.verdict(verdict);
                return;
            }
            sink.verdict(verdict);
        }
    }
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Observation {
    became_active: bool,
    verdict: Option<MonitorVerdict>,
}

/// Pure classification state, fed one sample per poll.
#[derive(Debug)]
struct Classifier {
    started: Instant,
    ever_connected: bool,
    disconnected_since: Option<Instant>,
    last_bytes: u64,
    last_progress: Instant,
}

impl Classifier {
    fn new(started: Instant) -> Self {
        Self {
            started,
            ever_connected: false,
            disconnected_since: None,
            last_bytes: 0,
            last_progress: started,
        }
    }

    fn observe(
        &mut self,
        state: PeerConnectionState,
        traffic: TrafficStats,
        now: Instant,
        options: &MonitorOptions,
    ) -> Observation {
        let mut observation = Observation::default();

        match state {
            PeerConnectionState::Connected => {
                self.disconnected_since = None;
                if !self.ever_connected {
                    self.ever_connected = true;
                    self.last_progress = now;
                    self.last_bytes = traffic.bytes_received;
                    observation.became_active = true;
                }
                if traffic.bytes_received > self.last_bytes {
                    self.last_bytes = traffic.bytes_received;
                    self.last_progress = now;
                }
                let stalled = !options.stall_threshold.is_zero()
                    && now.saturating_duration_since(self.last_progress) > options.stall_threshold;
                observation.verdict = Some(if stalled {
                    MonitorVerdict::ClientSideFailure
                } else {
                    MonitorVerdict::Healthy
                });
            }
            PeerConnectionState::Disconnected => {
                let since = *self.disconnected_since.get_or_insert(now);
                if now.saturating_duration_since(since) > options.disconnect_grace {
                    observation.verdict = Some(MonitorVerdict::ClientSideFailure);
                }
            }
            PeerConnectionState::Failed | PeerConnectionState::Closed => {
                observation.verdict = Some(MonitorVerdict::PeerFailure);
            }
            PeerConnectionState::New | PeerConnectionState::Connecting => {
                if !self.ever_connected
                    && now.saturating_duration_since(self.started) > options.connect_timeout
                {
                    observation.verdict = Some(MonitorVerdict::ClientSideFailure);
                }
            }
        }

        observation
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex as StdMutex;

    fn options() -> MonitorOptions {
        MonitorOptions::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_disconnect_grace(Duration::from_millis(100))
            .with_stall_threshold(Duration::from_millis(200))
            .with_connect_timeout(Duration::from_millis(300))
    }

    fn traffic(bytes: u64) -> TrafficStats {
        TrafficStats {
            bytes_received: bytes,
            packets_received: bytes / 100,
        }
    }

    // ── Sink ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sink_drops_duplicate_verdicts() {
        let (sink, mut rx) = MonitorSink::detached();
        assert!(sink.verdict(MonitorVerdict::Healthy));
        assert!(!sink.verdict(MonitorVerdict::Healthy));
        assert!(sink.verdict(MonitorVerdict::ClientSideFailure));

        let (_, first) = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            MonitorSignal::Verdict(VerdictReport {
                verdict: MonitorVerdict::Healthy,
                ..
            })
        ));
        let (_, second) = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            MonitorSignal::Verdict(VerdictReport {
                verdict: MonitorVerdict::ClientSideFailure,
                ..
            })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sink_is_monotonic_after_failure() {
        let (sink, mut rx) = MonitorSink::detached();
        assert!(sink.verdict(MonitorVerdict::PeerFailure));
        assert!(sink.has_failed());
        assert!(!sink.verdict(MonitorVerdict::Healthy));
        assert!(!sink.verdict(MonitorVerdict::ClientSideFailure));
        assert!(!sink.active());

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sink_reports_active_once() {
        let (sink, mut rx) = MonitorSink::detached();
        let clone = sink.clone();
        assert!(sink.active());
        assert!(!clone.active());
        assert_eq!(rx.recv().await.unwrap(), (0, MonitorSignal::Active));
    }

    // ── Classifier ──────────────────────────────────────────────────

    #[test]
    fn first_connected_sample_is_active_and_healthy() {
        let start = Instant::now();
        let mut classifier = Classifier::new(start);
        let observation =
            classifier.observe(PeerConnectionState::Connected, traffic(0), start, &options());
        assert!(observation.became_active);
        assert_eq!(observation.verdict, Some(MonitorVerdict::Healthy));

        let observation = classifier.observe(
            PeerConnectionState::Connected,
            traffic(100),
            start + Duration::from_millis(10),
            &options(),
        );
        assert!(!observation.became_active);
    }

    #[test]
    fn stalled_traffic_is_client_side_failure() {
        let start = Instant::now();
        let mut classifier = Classifier::new(start);
        classifier.observe(PeerConnectionState::Connected, traffic(500), start, &options());

        let later = start + Duration::from_millis(150);
        let observation =
            classifier.observe(PeerConnectionState::Connected, traffic(500), later, &options());
        assert_eq!(observation.verdict, Some(MonitorVerdict::Healthy));

        let much_later = start + Duration::from_millis(250);
        let observation =
            classifier.observe(PeerConnectionState::Connected, traffic(500), much_later, &options());
        assert_eq!(observation.verdict, Some(MonitorVerdict::ClientSideFailure));
    }

    #[test]
    fn growing_traffic_keeps_stream_healthy() {
        let start = Instant::now();
        let mut classifier = Classifier::new(start);
        for step in 0..10u64 {
            let now = start + Duration::from_millis(100 * step);
            let observation = classifier.observe(
                PeerConnectionState::Connected,
                traffic(step * 1000),
                now,
                &options(),
            );
            assert_eq!(observation.verdict, Some(MonitorVerdict::Healthy));
        }
    }

    #[test]
    fn zero_stall_threshold_disables_stall_detection() {
        let opts = options().with_stall_threshold(Duration::ZERO);
        let start = Instant::now();
        let mut classifier = Classifier::new(start);
        classifier.observe(PeerConnectionState::Connected, traffic(0), start, &opts);
        let observation = classifier.observe(
            PeerConnectionState::Connected,
            traffic(0),
            start + Duration::from_secs(60),
            &opts,
        );
        assert_eq!(observation.verdict, Some(MonitorVerdict::Healthy));
    }

    #[test]
    fn brief_disconnect_is_tolerated() {
        let start = Instant::now();
        let mut classifier = Classifier::new(start);
        classifier.observe(PeerConnectionState::Connected, traffic(0), start, &options());

        let t1 = start + Duration::from_millis(10);
        let observation =
            classifier.observe(PeerConnectionState::Disconnected, traffic(0), t1, &options());
        assert_eq!(observation.verdict, None);

        let t2 = start + Duration::from_millis(60);
        let observation =
            classifier.observe(PeerConnectionState::Connected, traffic(10), t2, &options());
        assert_eq!(observation.verdict, Some(MonitorVerdict::Healthy));

        // The grace period restarts after reconnecting.
        let t3 = start + Duration::from_millis(100);
        let observation =
            classifier.observe(PeerConnectionState::Disconnected, traffic(10), t3, &options());
        assert_eq!(observation.verdict, None);
    }

    #[test]
    fn lingering_disconnect_is_client_side_failure() {
        let start = Instant::now();
        let mut classifier = Classifier::new(start);
        classifier.observe(PeerConnectionState::Disconnected, traffic(0), start, &options());
        let observation = classifier.observe(
            PeerConnectionState::Disconnected,
            traffic(0),
            start + Duration::from_millis(150),
            &options(),
        );
        assert_eq!(observation.verdict, Some(MonitorVerdict::ClientSideFailure));
    }

    #[test]
    fn failed_and_closed_are_peer_failures() {
        let start = Instant::now();
        for state in [PeerConnectionState::Failed, PeerConnectionState::Closed] {
            let mut classifier = Classifier::new(start);
            let observation = classifier.observe(state, traffic(0), start, &options());
            assert_eq!(observation.verdict, Some(MonitorVerdict::PeerFailure));
        }
    }

    #[test]
    fn connect_timeout_is_client_side_failure() {
        let start = Instant::now();
        let mut classifier = Classifier::new(start);
        let observation = classifier.observe(
            PeerConnectionState::Connecting,
            traffic(0),
            start + Duration::from_millis(100),
            &options(),
        );
        assert_eq!(observation.verdict, None);

        let observation = classifier.observe(
            PeerConnectionState::Connecting,
            traffic(0),
            start + Duration::from_millis(400),
            &options(),
        );
        assert_eq!(observation.verdict, Some(MonitorVerdict::ClientSideFailure));
    }

    // ── Polling monitor ─────────────────────────────────────────────

    struct ScriptedPeer {
        state: StdMutex<PeerConnectionState>,
        bytes: AtomicU64,
    }

    impl ScriptedPeer {
        fn new(state: PeerConnectionState) -> Arc<Self> {
            Arc::new(Self {
                state: StdMutex::new(state),
                bytes: AtomicU64::new(0),
            })
        }

        fn set_state(&self, state: PeerConnectionState) {
            *self.state.lock().unwrap() = state;
        }
    }

    impl PeerConnection for ScriptedPeer {
        fn state(&self) -> PeerConnectionState {
            *self.state.lock().unwrap()
        }

        fn traffic(&self) -> TrafficStats {
            // Always make progress so stall detection stays quiet.
            let bytes = self.bytes.fetch_add(100, Ordering::Relaxed) + 100;
            traffic(bytes)
        }

        fn close(&self) {
            self.set_state(PeerConnectionState::Closed);
        }
    }

    async fn next_signal(
        rx: &mut mpsc::UnboundedReceiver<(u64, MonitorSignal)>,
    ) -> MonitorSignal {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for monitor signal")
            .expect("sink closed")
            .1
    }

    #[tokio::test]
    async fn polling_monitor_reports_active_healthy_then_failure() {
        let peer = ScriptedPeer::new(PeerConnectionState::Connected);
        let (sink, mut rx) = MonitorSink::detached();
        let mut monitor = PollingMonitor::new();
        monitor.start(peer.clone(), options(), sink);

        assert_eq!(next_signal(&mut rx).await, MonitorSignal::Active);
        match next_signal(&mut rx).await {
            MonitorSignal::Verdict(report) => assert_eq!(report.verdict, MonitorVerdict::Healthy),
            other => panic!("expected healthy verdict, got {other:?}"),
        }

        peer.set_state(PeerConnectionState::Failed);
        match next_signal(&mut rx).await {
            MonitorSignal::Verdict(report) => {
                assert_eq!(report.verdict, MonitorVerdict::PeerFailure)
            }
            other => panic!("expected failure verdict, got {other:?}"),
        }

        // The poll task ends after a failure.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!monitor.is_running());
        monitor.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_silences_monitor() {
        let peer = ScriptedPeer::new(PeerConnectionState::Connecting);
        let (sink, mut rx) = MonitorSink::detached();
        let mut monitor = PollingMonitor::new();
        monitor.start(peer.clone(), options(), sink);
        assert!(monitor.is_running());

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());

        peer.set_state(PeerConnectionState::Failed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn poll_interval_is_clamped() {
        let options = MonitorOptions::new().with_poll_interval(Duration::ZERO);
        assert_eq!(options.poll_interval, MIN_POLL_INTERVAL);
    }

    #[test]
    fn verdict_names() {
        assert_eq!(MonitorVerdict::ClientSideFailure.as_str(), "client-side-failure");
        assert!(MonitorVerdict::PeerFailure.is_failure());
        assert!(!MonitorVerdict::Healthy.is_failure());
    }
}
