//! Peer connection abstraction.
//!
//! Media negotiation happens elsewhere; this crate only needs to observe a
//! connection's state and traffic counters and to close it. Implement
//! [`PeerConnectionFactory`] for the WebRTC stack in use.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::StreamRecord;

/// Connection state of a peer connection, mirroring `RTCPeerConnectionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Cumulative inbound traffic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrafficStats {
    pub bytes_received: u64,
    pub packets_received: u64,
}

/// A live peer connection carrying one subscribed stream.
pub trait PeerConnection: Send + Sync + 'static {
    /// Current connection state.
    fn state(&self) -> PeerConnectionState;

    /// Current inbound traffic counters.
    fn traffic(&self) -> TrafficStats;

    /// Close the connection and release its resources. Must be idempotent.
    fn close(&self);
}

/// Creates peer connections for streams set up through signaling.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync + 'static {
    /// Negotiate a receive-only connection for `stream_id`.
    async fn connect(
        &self,
        stream_id: &str,
        stream: &StreamRecord,
    ) -> Result<Arc<dyn PeerConnection>>;
}
