//! Events delivered to the caller of [`ChannelExpress::join_channel`](crate::express::ChannelExpress::join_channel).
//!
//! One receiver carries everything about one join. Across any number of
//! silent rejoins the sequence looks like:
//!
//! ```text
//! (NoStreamPlaying)? Subscribed (Active)? [Subscribed (Active)?]* (Ended | Failed)?
//! ```
//!
//! After a terminal event or a dispose the channel closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::{MemberRecord, RoomInfo, StreamId, StreamRecord};
use crate::reason::{FailureReason, StreamEndReason};
use crate::stream::StreamHandle;
use crate::subscription::SubscriptionStatus;

/// Payload of [`ChannelEvent::Subscribed`].
#[derive(Debug, Clone)]
pub struct SubscribedPayload {
    /// The channel room, if the service described it.
    pub room: Option<RoomInfo>,
    /// The presenter whose stream is subscribed.
    pub presenter: MemberRecord,
    /// The presenter's stream record that was subscribed.
    pub stream: StreamRecord,
    /// The live stream. Render media from [`StreamHandle::peer`].
    pub handle: Arc<StreamHandle>,
}

/// Events for one channel join.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The peer connection of a stream was established for the first time.
    Active { stream_id: StreamId },
    /// The join (or a silent rejoin) succeeded; status `ok`.
    Subscribed(Box<SubscribedPayload>),
    /// The channel has no presenter publishing yet; status stays pending.
    NoStreamPlaying { room: Option<RoomInfo> },
    /// The stream was ended authoritatively. Terminal.
    Ended { reason: StreamEndReason },
    /// The subscription gave up. Terminal.
    Failed { reason: FailureReason },
}

impl ChannelEvent {
    /// The subscription status this event reports, or `None` for
    /// [`Active`](Self::Active), which is not a status change.
    pub fn status(&self) -> Option<SubscriptionStatus> {
        match self {
            Self::Active { .. } => None,
            Self::Subscribed(_) => Some(SubscriptionStatus::Ok),
            Self::NoStreamPlaying { .. } => Some(SubscriptionStatus::Pending),
            Self::Ended { .. } => Some(SubscriptionStatus::Ended),
            Self::Failed { .. } => Some(SubscriptionStatus::Failed),
        }
    }

    /// Returns `true` for the last event a subscription emits.
    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(SubscriptionStatus::is_terminal)
    }
}

/// Receiving end of one channel join.
///
/// Closes after the terminal event. Once the join's
/// [`ChannelSubscriptionHandle`](crate::express::ChannelSubscriptionHandle) is
/// disposed it yields nothing more, including events that were already queued.
#[derive(Debug)]
pub struct ChannelEvents {
    rx: mpsc::Receiver<ChannelEvent>,
    disposed: Arc<AtomicBool>,
}

impl ChannelEvents {
    pub(crate) fn new(rx: mpsc::Receiver<ChannelEvent>, disposed: Arc<AtomicBool>) -> Self {
        Self { rx, disposed }
    }

    /// Receive the next event, or `None` once the subscription is over.
    ///
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.is_disposed() {
            return None;
        }
        let event = self.rx.recv().await?;
        if self.is_disposed() {
            return None;
        }
        Some(event)
    }

    /// Receive an event that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        if self.is_disposed() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    fn is_disposed(&mut self) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            self.rx.close();
            return true;
        }
        false
    }
}
