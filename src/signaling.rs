//! The signaling collaborator seen from the subscription engine.
//!
//! [`SignalingChannel`] is everything [`ChannelExpress`](crate::express::ChannelExpress)
//! needs from the service: join a room, set up and destroy streams, and a
//! stream of unsolicited lifecycle events. [`SignalingClient`](crate::client::SignalingClient)
//! implements it over any [`Transport`](crate::transport::Transport); tests
//! substitute an in-memory double.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::protocol::{
    ChannelDescriptor, JoinRoomResponse, RoomEvent, SessionId, StreamEndedEvent, StreamId,
    StreamRecord, StreamSetup,
};

/// Unsolicited events delivered by the signaling service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// A stream ended on the service side.
    StreamEnded(StreamEndedEvent),
    /// Room membership changed.
    RoomEvent(RoomEvent),
    /// The signaling connection is gone for good and will not come back.
    Disconnected {
        /// Human-readable cause, if known.
        reason: Option<String>,
    },
}

/// Asynchronous interface to the signaling service.
///
/// Responses carrying a non-ok `status` are returned as `Ok`; interpreting the
/// status is the caller's decision. `Err` is reserved for failures to obtain a
/// response at all.
#[async_trait]
pub trait SignalingChannel: Send + Sync + 'static {
    /// Join the room described by `descriptor` as an audience member.
    async fn join_room(&self, descriptor: &ChannelDescriptor) -> Result<JoinRoomResponse>;

    /// Subscribe to a published stream.
    async fn setup_stream(
        &self,
        stream: &StreamRecord,
        capabilities: &[String],
    ) -> Result<StreamSetup>;

    /// Release a stream previously returned by [`setup_stream`](Self::setup_stream).
    async fn destroy_stream(&self, stream_id: &str, reason: &str) -> Result<()>;

    /// Receive every unsolicited event from now on.
    fn subscribe_events(&self) -> broadcast::Receiver<SignalingEvent>;
}

/// The `(streamId, sessionId)` pair a stream-ended event must carry to concern
/// a particular subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamScope {
    pub stream_id: StreamId,
    pub session_id: SessionId,
}

impl StreamScope {
    /// Returns `true` if `event` is about this stream.
    pub fn matches(&self, event: &StreamEndedEvent) -> bool {
        self.stream_id == event.stream_id && self.session_id == event.session_id
    }
}
