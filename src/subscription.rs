//! Subscription state for one channel join.
//!
//! A [`ChannelSubscription`] owns at most one live `(StreamHandle,
//! PeerConnectionMonitor)` pair. Each installed pair gets a new generation
//! number; monitor signals tagged with an older generation are stale and must
//! be ignored by the caller. The state is only mutated from the subscription's
//! event loop in [`express`](crate::express).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::monitor::{MonitorMessage, MonitorOptions, MonitorSink, PeerConnectionMonitor};
use crate::protocol::{ChannelDescriptor, StreamEndedEvent, StreamId};
use crate::signaling::StreamScope;
use crate::stream::StreamHandle;

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionStatus {
    /// Joining, rejoining, or waiting for a presenter.
    Pending,
    /// A stream is installed and monitored.
    Ok,
    /// The stream was ended authoritatively. Terminal.
    Ended,
    /// The subscription gave up. Terminal.
    Failed,
}

impl SubscriptionStatus {
    /// Returns `true` for `Ended` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Ended => "ended",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a subscription owns.
struct SubscriptionState {
    status: SubscriptionStatus,
    stream: Option<Arc<StreamHandle>>,
    monitor: Option<Box<dyn PeerConnectionMonitor>>,
    /// Rejoins since the last stream became active. Never surfaced as an event.
    retry_count: u32,
}

/// One channel join and its currently installed stream.
pub struct ChannelSubscription {
    descriptor: ChannelDescriptor,
    state: SubscriptionState,
    generation: u64,
    /// Scope of the most recently installed stream; kept through a rejoin so
    /// an authoritative end of the stream being replaced still applies.
    last_scope: Option<StreamScope>,
    /// Set synchronously by the caller on dispose.
    disposed: Arc<AtomicBool>,
}

impl ChannelSubscription {
    pub fn new(descriptor: ChannelDescriptor, disposed: Arc<AtomicBool>) -> Self {
        Self {
            descriptor,
            state: SubscriptionState {
                status: SubscriptionStatus::Pending,
                stream: None,
                monitor: None,
                retry_count: 0,
            },
            generation: 0,
            last_scope: None,
            disposed,
        }
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.state.status
    }

    /// Returns `true` once the subscription ended, failed, or was disposed.
    pub fn is_terminal(&self) -> bool {
        self.state.status.is_terminal() || self.disposed.load(Ordering::Acquire)
    }

    pub fn retry_count(&self) -> u32 {
        self.state.retry_count
    }

    /// Generation of the live pair, or of the last one if none is live.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The live stream, if any.
    pub fn stream(&self) -> Option<&Arc<StreamHandle>> {
        self.state.stream.as_ref()
    }

    /// Returns `true` if a signal tagged `generation` comes from the live pair.
    pub fn is_current(&self, generation: u64) -> bool {
        self.state.stream.is_some() && generation == self.generation && !self.is_terminal()
    }

    /// Returns `true` if `event` concerns the live stream or the one being replaced.
    pub fn matches_stream(&self, event: &StreamEndedEvent) -> bool {
        self.last_scope
            .as_ref()
            .is_some_and(|scope| scope.matches(event))
    }

    /// Install a new stream and start monitoring it.
    ///
    /// Returns `false` (and installs nothing) if the subscription is terminal
    /// or the previous pair has not been torn down.
    pub fn install(
        &mut self,
        stream: Arc<StreamHandle>,
        mut monitor: Box<dyn PeerConnectionMonitor>,
        options: MonitorOptions,
        signals: mpsc::UnboundedSender<MonitorMessage>,
    ) -> bool {
        if self.is_terminal() || self.state.stream.is_some() {
            return false;
        }

        self.generation += 1;
        monitor.start(
            stream.peer(),
            options,
            MonitorSink::new(self.generation, signals),
        );
        self.last_scope = Some(stream.scope().clone());
        self.state.stream = Some(stream);
        self.state.monitor = Some(monitor);
        self.state.status = SubscriptionStatus::Ok;
        true
    }

    /// Record activation of the live stream.
    ///
    /// Returns the stream id the first time the live stream reports active.
    /// Activation resets the rejoin counter.
    pub fn mark_active(&mut self, generation: u64) -> Option<StreamId> {
        if !self.is_current(generation) {
            return None;
        }
        let stream = self.state.stream.as_ref()?;
        if !stream.mark_active() {
            return None;
        }
        self.state.retry_count = 0;
        Some(stream.stream_id().to_string())
    }

    /// Tear down the live pair and count a rejoin.
    ///
    /// Returns the new retry count, or `None` without touching anything if the
    /// subscription is terminal.
    pub async fn rejoin(&mut self, reason: &str) -> Option<u32> {
        if self.is_terminal() {
            return None;
        }
        self.teardown(reason).await;
        self.state.status = SubscriptionStatus::Pending;
        self.state.retry_count += 1;
        Some(self.state.retry_count)
    }

    /// Tear down the live pair and enter `status`, which must be terminal.
    ///
    /// Returns `false` if `status` is not terminal or the subscription already
    /// reached a terminal status.
    pub async fn terminate(&mut self, status: SubscriptionStatus, reason: &str) -> bool {
        if !status.is_terminal() || self.state.status.is_terminal() {
            return false;
        }
        self.state.status = status;
        self.teardown(reason).await;
        true
    }

    /// Stop the monitor and dispose the stream. Idempotent.
    pub async fn teardown(&mut self, reason: &str) {
        if let Some(mut monitor) = self.state.monitor.take() {
            monitor.stop();
        }
        if let Some(stream) = self.state.stream.take() {
            debug!(
                alias = %self.descriptor.alias,
                stream_id = %stream.stream_id(),
                reason,
                "tearing down stream"
            );
            stream.dispose(reason).await;
        }
    }
}

impl fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("alias", &self.descriptor.alias)
            .field("status", &self.state.status)
            .field("generation", &self.generation)
            .field("retry_count", &self.state.retry_count)
            .field("stream", &self.state.stream)
            .finish()
    }
}
