//! Channel join coordination.
//!
//! [`ChannelExpress::join_channel`] spawns one event loop per join. The loop
//! owns a [`ChannelSubscription`] and merges three inputs with `tokio::select!`:
//!
//! 1. the dispose signal from [`ChannelSubscriptionHandle::dispose`];
//! 2. signaling events (stream ended, room membership);
//! 3. monitor signals for the installed stream, tagged by generation;
//!
//! plus the completion of the join attempt in flight, if any. Inputs are
//! handled strictly one at a time, in that priority order, so an authoritative
//! stream end that arrives together with a monitor failure always wins.
//!
//! # Example
//!
//! ```rust,ignore
//! let express = ChannelExpress::new(signaling, peer_factory, ChannelExpressConfig::new());
//! let (subscription, mut events) =
//!     express.join_channel(ChannelDescriptor::new("ChannelAlias"));
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChannelEvent::Subscribed(payload) => render(payload.handle.peer()),
//!         ChannelEvent::Ended { reason } => println!("stream ended: {reason}"),
//!         _ => {}
//!     }
//! }
//! subscription.dispose();
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{ChannelExpressError, Result};
use crate::event::{ChannelEvent, ChannelEvents, SubscribedPayload};
use crate::monitor::{
    MonitorFactory, MonitorMessage, MonitorOptions, MonitorSignal, MonitorVerdict,
    PollingMonitorFactory,
};
use crate::peer::PeerConnectionFactory;
use crate::protocol::{
    select_presenter, ChannelDescriptor, MemberRecord, RoomEvent, RoomId, RoomInfo,
    StreamEndedEvent, StreamRecord, STATUS_OK,
};
use crate::reason::{FailureReason, StreamEndReason};
use crate::signaling::{SignalingChannel, SignalingEvent};
use crate::stream::StreamHandle;
use crate::subscription::{ChannelSubscription, SubscriptionStatus};

/// Default capacity of each subscription's event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 32;

/// Default number of consecutive rejoins before giving up.
const DEFAULT_MAX_REJOIN_ATTEMPTS: u32 = 5;

/// Default delay before the second consecutive rejoin.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Default upper bound for the rejoin delay.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Reason sent to the service when the caller disposes a subscription.
const DISPOSE_REASON: &str = "disposed";

// ── Configuration ───────────────────────────────────────────────────

/// Bounded exponential backoff for silent rejoins.
///
/// The first rejoin after a healthy stream is immediate; each further
/// consecutive rejoin waits twice as long as the previous one, starting at
/// `initial_backoff` and capped at `max_backoff`. The counter resets when a
/// rejoined stream becomes active. After `max_attempts` consecutive rejoins the
/// subscription fails with [`FailureReason::RetriesExhausted`].
///
/// ```
/// use channel_express::express::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new().with_initial_backoff(Duration::from_millis(100));
/// assert_eq!(policy.delay_for(1), Duration::ZERO);
/// assert_eq!(policy.delay_for(2), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(3), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive rejoins allowed before failing. Zero disables rejoining.
    pub max_attempts: u32,
    /// Delay before the second consecutive rejoin.
    pub initial_backoff: Duration,
    /// Upper bound for any rejoin delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_REJOIN_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Values below the initial backoff are raised to it.
    #[must_use]
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff.max(self.initial_backoff);
        self
    }

    /// Delay before consecutive rejoin number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`ChannelExpress`].
///
/// # Example
///
/// ```
/// use channel_express::express::{ChannelExpressConfig, RetryPolicy};
///
/// let config = ChannelExpressConfig::new()
///     .with_event_channel_capacity(8)
///     .with_retry_policy(RetryPolicy::new().with_max_attempts(3));
/// assert_eq!(config.retry.max_attempts, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelExpressConfig {
    /// Capacity of each subscription's event channel. Values below 1 are
    /// clamped to 1. Status events wait for room; `Active` events are
    /// dropped with a warning when the channel is full.
    pub event_channel_capacity: usize,
    /// Rejoin policy.
    pub retry: RetryPolicy,
    /// Options handed to every monitor.
    pub monitor: MonitorOptions,
}

impl ChannelExpressConfig {
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            retry: RetryPolicy::new(),
            monitor: MonitorOptions::new(),
        }
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_monitor_options(mut self, monitor: MonitorOptions) -> Self {
        self.monitor = monitor;
        self
    }
}

impl Default for ChannelExpressConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Subscription handle ─────────────────────────────────────────────

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct HandleInner {
    alias: String,
    disposed: Arc<AtomicBool>,
    dispose_tx: watch::Sender<bool>,
}

/// Caller-side handle of one channel join. Cheap to clone.
#[derive(Clone)]
pub struct ChannelSubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl ChannelSubscriptionHandle {
    fn new(alias: String, disposed: Arc<AtomicBool>, dispose_tx: watch::Sender<bool>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                alias,
                disposed,
                dispose_tx,
            }),
        }
    }

    /// Alias of the joined channel.
    pub fn alias(&self) -> &str {
        &self.inner.alias
    }

    /// Stop the subscription and release its stream.
    ///
    /// Takes effect immediately: once this returns, [`ChannelEvents::recv`]
    /// yields `None`, even for events that were already queued or a join
    /// that is still in flight. Teardown finishes in the background. Calling
    /// it again does nothing.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        if !self.inner.dispose_tx.send_replace(true) {
            debug!(alias = %self.inner.alias, "disposing channel subscription");
        }
    }

    /// Returns `true` once [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Returns `true` once the subscription was disposed or its event loop
    /// has exited.
    pub fn is_closed(&self) -> bool {
        self.is_disposed() || self.inner.dispose_tx.is_closed()
    }
}

impl std::fmt::Debug for ChannelSubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscriptionHandle")
            .field("alias", &self.inner.alias)
            .field("disposed", &self.is_disposed())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Coordinator ─────────────────────────────────────────────────────

/// Collaborators shared by every subscription of one [`ChannelExpress`].
#[derive(Clone)]
struct ExpressContext {
    signaling: Arc<dyn SignalingChannel>,
    peers: Arc<dyn PeerConnectionFactory>,
    monitors: Arc<dyn MonitorFactory>,
    config: ChannelExpressConfig,
}

/// Joins channels and keeps their subscriptions alive.
pub struct ChannelExpress {
    context: ExpressContext,
    subscriptions: StdMutex<Vec<ChannelSubscriptionHandle>>,
    disposed: AtomicBool,
}

impl ChannelExpress {
    /// Create a coordinator that monitors streams with [`PollingMonitor`](crate::monitor::PollingMonitor).
    pub fn new(
        signaling: Arc<dyn SignalingChannel>,
        peers: Arc<dyn PeerConnectionFactory>,
        config: ChannelExpressConfig,
    ) -> Self {
        Self {
            context: ExpressContext {
                signaling,
                peers,
                monitors: Arc::new(PollingMonitorFactory),
                config,
            },
            subscriptions: StdMutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Replace the monitor implementation used for new subscriptions.
    #[must_use]
    pub fn with_monitor_factory(mut self, monitors: Arc<dyn MonitorFactory>) -> Self {
        self.context.monitors = monitors;
        self
    }

    pub fn config(&self) -> &ChannelExpressConfig {
        &self.context.config
    }

    /// Join a channel and keep its presenter stream subscribed.
    ///
    /// Must be called within a Tokio runtime. All events for this join,
    /// across any number of silent rejoins, arrive on the returned
    /// [`ChannelEvents`], which closes after the terminal event or after
    /// dispose.
    #[must_use = "the event receiver must be used to receive channel events"]
    pub fn join_channel(
        &self,
        descriptor: ChannelDescriptor,
    ) -> (ChannelSubscriptionHandle, ChannelEvents) {
        let (event_tx, event_rx) =
            mpsc::channel(self.context.config.event_channel_capacity.max(1));
        let (dispose_tx, dispose_rx) = watch::channel(false);
        let disposed = Arc::new(AtomicBool::new(false));
        let handle =
            ChannelSubscriptionHandle::new(descriptor.alias.clone(), disposed.clone(), dispose_tx);
        let events = ChannelEvents::new(event_rx, Arc::clone(&disposed));

        if self.disposed.load(Ordering::Acquire) {
            warn!(alias = %descriptor.alias, "join_channel called after dispose");
            handle.dispose();
            return (handle, events);
        }

        // Subscribe before the join request goes out so no event is missed.
        let signaling_rx = self.context.signaling.subscribe_events();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let actor = SubscriptionActor {
            ctx: Arc::new(self.context.clone()),
            subscription: ChannelSubscription::new(descriptor, Arc::clone(&disposed)),
            events: event_tx,
            disposed,
            dispose_rx,
            signals_tx,
            attempt: None,
            waiting: None,
        };
        tokio::spawn(actor.run(signals_rx, signaling_rx));

        let mut subscriptions = lock(&self.subscriptions);
        subscriptions.retain(|subscription| !subscription.is_closed());
        subscriptions.push(handle.clone());

        (handle, events)
    }

    /// Number of subscriptions whose event loop is still running.
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.subscriptions)
            .iter()
            .filter(|subscription| !subscription.is_closed())
            .count()
    }

    /// Dispose every subscription created by this coordinator. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        debug!(count = subscriptions.len(), "disposing channel express");
        for subscription in subscriptions {
            subscription.dispose();
        }
    }
}

impl std::fmt::Debug for ChannelExpress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelExpress")
            .field("config", &self.context.config)
            .field("active_subscriptions", &self.active_subscriptions())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}

impl Drop for ChannelExpress {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Join attempts ───────────────────────────────────────────────────

/// Successful outcome of a join attempt.
enum Attempt {
    Subscribed {
        room: Option<RoomInfo>,
        presenter: MemberRecord,
        stream: StreamRecord,
        handle: Arc<StreamHandle>,
    },
    NoPresenter {
        room: Option<RoomInfo>,
    },
}

type AttemptFuture = Pin<Box<dyn Future<Output = Result<Attempt>> + Send>>;

fn join_attempt(
    ctx: Arc<ExpressContext>,
    descriptor: ChannelDescriptor,
    delay: Duration,
) -> AttemptFuture {
    Box::pin(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        debug!(alias = %descriptor.alias, "sending join request");
        let response = ctx.signaling.join_room(&descriptor).await?;
        if !response.is_ok() {
            return Err(ChannelExpressError::JoinRejected {
                status: response.status,
            });
        }

        let Some((presenter, stream)) = select_presenter(&response.members) else {
            return Ok(Attempt::NoPresenter {
                room: response.room,
            });
        };
        let presenter = presenter.clone();
        let stream = stream.clone();
        subscribe(&ctx, &descriptor.capabilities, response.room, presenter, stream).await
    })
}

fn presenter_attempt(
    ctx: Arc<ExpressContext>,
    capabilities: Vec<String>,
    room: Option<RoomInfo>,
    presenter: MemberRecord,
    stream: StreamRecord,
) -> AttemptFuture {
    Box::pin(async move { subscribe(&ctx, &capabilities, room, presenter, stream).await })
}

/// Set up the presenter's stream and connect to it.
async fn subscribe(
    ctx: &ExpressContext,
    capabilities: &[String],
    room: Option<RoomInfo>,
    presenter: MemberRecord,
    stream: StreamRecord,
) -> Result<Attempt> {
    let setup = ctx.signaling.setup_stream(&stream, capabilities).await?;
    let stream_id = match setup.stream_id {
        Some(stream_id) if setup.status == STATUS_OK => stream_id,
        _ => {
            return Err(ChannelExpressError::StreamSetupRejected {
                status: setup.status,
            })
        }
    };

    let peer = match ctx.peers.connect(&stream_id, &stream).await {
        Ok(peer) => peer,
        Err(e) => {
            if let Err(destroy_err) = ctx.signaling.destroy_stream(&stream_id, "failed").await {
                debug!(%stream_id, "failed to destroy unconnected stream: {destroy_err}");
            }
            return Err(e);
        }
    };

    let handle = Arc::new(StreamHandle::new(
        stream.uri.clone(),
        stream_id,
        setup.session_id.unwrap_or_default(),
        peer,
        Arc::clone(&ctx.signaling),
    ));
    Ok(Attempt::Subscribed {
        room,
        presenter,
        stream,
        handle,
    })
}

/// Resolves once the caller disposed the subscription or dropped every handle.
async fn dispose_requested(dispose_rx: &mut watch::Receiver<bool>) {
    let _ = dispose_rx.wait_for(|disposed| *disposed).await;
}

async fn poll_attempt(attempt: &mut Option<AttemptFuture>) -> Result<Attempt> {
    match attempt {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

/// Reason recorded on the service when a stream is torn down for `verdict`.
fn teardown_reason(verdict: MonitorVerdict) -> StreamEndReason {
    match verdict {
        MonitorVerdict::PeerFailure => StreamEndReason::Failed,
        MonitorVerdict::ClientSideFailure | MonitorVerdict::Healthy => {
            StreamEndReason::ClientSideFailure
        }
    }
}

// ── Event loop ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Waiting for a presenter to appear in `room_id`.
struct Waiting {
    room_id: Option<RoomId>,
    room: Option<RoomInfo>,
}

struct SubscriptionActor {
    ctx: Arc<ExpressContext>,
    subscription: ChannelSubscription,
    events: mpsc::Sender<ChannelEvent>,
    disposed: Arc<AtomicBool>,
    dispose_rx: watch::Receiver<bool>,
    signals_tx: mpsc::UnboundedSender<MonitorMessage>,
    attempt: Option<AttemptFuture>,
    waiting: Option<Waiting>,
}

impl SubscriptionActor {
    async fn run(
        mut self,
        mut signals_rx: mpsc::UnboundedReceiver<MonitorMessage>,
        mut signaling_rx: broadcast::Receiver<SignalingEvent>,
    ) {
        info!(alias = %self.alias(), "joining channel");
        self.attempt = Some(join_attempt(
            Arc::clone(&self.ctx),
            self.subscription.descriptor().clone(),
            Duration::ZERO,
        ));

        loop {
            let flow = tokio::select! {
                biased;

                () = dispose_requested(&mut self.dispose_rx) => {
                    debug!(alias = %self.alias(), "dispose requested");
                    Flow::Stop
                }

                event = signaling_rx.recv() => self.on_signaling_event(event).await,

                Some((generation, signal)) = signals_rx.recv() => {
                    self.on_monitor_signal(generation, signal).await
                }

                outcome = poll_attempt(&mut self.attempt), if self.attempt.is_some() => {
                    self.attempt = None;
                    self.on_attempt(outcome).await
                }
            };

            if flow == Flow::Stop {
                break;
            }
        }

        self.attempt = None;
        self.subscription.teardown(DISPOSE_REASON).await;
        debug!(
            alias = %self.alias(),
            status = %self.subscription.status(),
            "channel subscription loop exited"
        );
    }

    fn alias(&self) -> &str {
        &self.subscription.descriptor().alias
    }

    // ── Inputs ──────────────────────────────────────────────────────

    async fn on_signaling_event(
        &mut self,
        event: std::result::Result<SignalingEvent, RecvError>,
    ) -> Flow {
        match event {
            Ok(SignalingEvent::StreamEnded(ended)) => self.on_stream_ended(ended).await,
            Ok(SignalingEvent::RoomEvent(room_event)) => {
                self.on_room_event(room_event);
                Flow::Continue
            }
            Ok(SignalingEvent::Disconnected { reason }) => {
                warn!(alias = %self.alias(), ?reason, "signaling disconnected");
                self.fail(FailureReason::SignalingClosed).await
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(alias = %self.alias(), skipped, "signaling events lagged");
                Flow::Continue
            }
            Err(RecvError::Closed) => self.fail(FailureReason::SignalingClosed).await,
        }
    }

    async fn on_stream_ended(&mut self, ended: StreamEndedEvent) -> Flow {
        if !self.subscription.matches_stream(&ended) {
            debug!(stream_id = %ended.stream_id, "ignoring end of unrelated stream");
            return Flow::Continue;
        }

        if ended.reason.is_terminal() {
            if self.attempt.take().is_some() {
                info!(alias = %self.alias(), "stream end supersedes rejoin in flight");
            }
            info!(
                alias = %self.alias(),
                stream_id = %ended.stream_id,
                reason = %ended.reason,
                "channel stream ended"
            );
            if self
                .subscription
                .terminate(SubscriptionStatus::Ended, ended.reason.as_str())
                .await
            {
                self.emit(ChannelEvent::Ended {
                    reason: ended.reason,
                })
                .await;
            }
            return Flow::Stop;
        }

        // A rejoin is already underway, or the old stream is gone and the
        // subscription waits for a presenter.
        if self.attempt.is_some() || self.subscription.stream().is_none() {
            debug!(stream_id = %ended.stream_id, "ignoring recoverable end of replaced stream");
            return Flow::Continue;
        }
        warn!(
            alias = %self.alias(),
            stream_id = %ended.stream_id,
            reason = %ended.reason,
            "stream ended recoverably, rejoining"
        );
        let cause = format!("stream ended: {}", ended.reason);
        self.schedule_rejoin(&ended.reason, cause).await
    }

    fn on_room_event(&mut self, room_event: RoomEvent) {
        let Some(waiting) = &self.waiting else {
            return;
        };
        if self.attempt.is_some()
            || waiting
                .room_id
                .as_ref()
                .is_some_and(|room_id| *room_id != room_event.room_id)
        {
            return;
        }
        let Some((presenter, stream)) = select_presenter(&room_event.members) else {
            return;
        };

        info!(
            alias = %self.alias(),
            presenter = %presenter.screen_name,
            "presenter started publishing"
        );
        let presenter = presenter.clone();
        let stream = stream.clone();
        let room = self.waiting.take().and_then(|waiting| waiting.room);
        self.attempt = Some(presenter_attempt(
            Arc::clone(&self.ctx),
            self.subscription.descriptor().capabilities.clone(),
            room,
            presenter,
            stream,
        ));
    }

    async fn on_monitor_signal(&mut self, generation: u64, signal: MonitorSignal) -> Flow {
        if !self.subscription.is_current(generation) {
            debug!(generation, "ignoring signal from replaced monitor");
            return Flow::Continue;
        }

        match signal {
            MonitorSignal::Active => match self.subscription.mark_active(generation) {
                Some(stream_id) => {
                    info!(alias = %self.alias(), %stream_id, "stream active");
                    self.emit(ChannelEvent::Active { stream_id }).await
                }
                None => Flow::Continue,
            },
            MonitorSignal::Verdict(report) if report.verdict.is_failure() => {
                warn!(
                    alias = %self.alias(),
                    verdict = report.verdict.as_str(),
                    "stream unhealthy, rejoining"
                );
                let cause = format!("monitor reported {}", report.verdict.as_str());
                self.schedule_rejoin(&teardown_reason(report.verdict), cause)
                    .await
            }
            MonitorSignal::Verdict(report) => {
                debug!(alias = %self.alias(), verdict = report.verdict.as_str(), "monitor verdict");
                Flow::Continue
            }
        }
    }

    async fn on_attempt(&mut self, outcome: Result<Attempt>) -> Flow {
        match outcome {
            Ok(Attempt::Subscribed {
                room,
                presenter,
                stream,
                handle,
            }) => {
                let monitor = self.ctx.monitors.create();
                if !self.subscription.install(
                    Arc::clone(&handle),
                    monitor,
                    self.ctx.config.monitor,
                    self.signals_tx.clone(),
                ) {
                    handle.dispose(DISPOSE_REASON).await;
                    return if self.subscription.is_terminal() {
                        Flow::Stop
                    } else {
                        Flow::Continue
                    };
                }
                info!(
                    alias = %self.alias(),
                    stream_id = %handle.stream_id(),
                    generation = self.subscription.generation(),
                    "subscribed to channel stream"
                );
                self.emit(ChannelEvent::Subscribed(Box::new(SubscribedPayload {
                    room,
                    presenter,
                    stream,
                    handle,
                })))
                .await
            }
            Ok(Attempt::NoPresenter { room }) => {
                info!(alias = %self.alias(), "no presenter publishing, waiting");
                self.waiting = Some(Waiting {
                    room_id: room.as_ref().map(|room| room.room_id.clone()),
                    room: room.clone(),
                });
                self.emit(ChannelEvent::NoStreamPlaying { room }).await
            }
            Err(ChannelExpressError::JoinRejected { status }) => {
                warn!(alias = %self.alias(), %status, "join rejected");
                self.fail(FailureReason::JoinRejected { status }).await
            }
            Err(e) if !e.is_recoverable() => {
                warn!(alias = %self.alias(), "join failed: {e}");
                self.fail(FailureReason::Unrecoverable {
                    message: e.to_string(),
                })
                .await
            }
            Err(e) => {
                warn!(alias = %self.alias(), "join attempt failed: {e}");
                self.schedule_rejoin(&StreamEndReason::Failed, e.to_string())
                    .await
            }
        }
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Tear down the live stream and start another join, or fail once the
    /// retry policy is exhausted.
    async fn schedule_rejoin(&mut self, reason: &StreamEndReason, cause: String) -> Flow {
        let policy = self.ctx.config.retry;
        let attempts = self.subscription.retry_count();
        if attempts >= policy.max_attempts {
            warn!(alias = %self.alias(), attempts, "giving up on channel");
            return self
                .fail(FailureReason::RetriesExhausted {
                    attempts,
                    last_error: cause,
                })
                .await;
        }

        let Some(attempt) = self.subscription.rejoin(reason.as_str()).await else {
            return Flow::Stop;
        };
        let delay = policy.delay_for(attempt);
        info!(alias = %self.alias(), attempt, ?delay, %cause, "rejoining channel");
        self.waiting = None;
        self.attempt = Some(join_attempt(
            Arc::clone(&self.ctx),
            self.subscription.descriptor().clone(),
            delay,
        ));
        Flow::Continue
    }

    async fn fail(&mut self, reason: FailureReason) -> Flow {
        self.attempt = None;
        if self
            .subscription
            .terminate(SubscriptionStatus::Failed, StreamEndReason::Failed.as_str())
            .await
        {
            info!(alias = %self.alias(), %reason, "channel subscription failed");
            self.emit(ChannelEvent::Failed { reason }).await;
        }
        Flow::Stop
    }

    /// Deliver `event` unless the caller has disposed the subscription.
    ///
    /// Waiting for room in a full channel gives way to dispose. Returns
    /// [`Flow::Stop`] if the caller is gone.
    async fn emit(&mut self, event: ChannelEvent) -> Flow {
        if self.disposed.load(Ordering::Acquire) {
            debug!(alias = %self.alias(), "subscription disposed, dropping event");
            return Flow::Stop;
        }

        if let ChannelEvent::Active { .. } = event {
            return match self.events.try_send(event) {
                Ok(()) => Flow::Continue,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(alias = %self.alias(), "event channel full, dropping active event");
                    Flow::Continue
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Flow::Stop,
            };
        }

        let permit = tokio::select! {
            biased;

            () = dispose_requested(&mut self.dispose_rx) => {
                debug!(alias = %self.alias(), "disposed while waiting to deliver an event");
                return Flow::Stop;
            }

            permit = self.events.reserve() => permit,
        };
        let Ok(permit) = permit else {
            debug!(alias = %self.alias(), "event receiver dropped");
            return Flow::Stop;
        };
        if self.disposed.load(Ordering::Acquire) {
            return Flow::Stop;
        }
        permit.send(event);
        Flow::Continue
    }
}
