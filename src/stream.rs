//! A single subscribed media stream.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::peer::PeerConnection;
use crate::protocol::{SessionId, StreamId};
use crate::signaling::{SignalingChannel, StreamScope};

/// Owns the peer connection of one stream subscription.
///
/// The handle is shared (`Arc`) between the subscription that monitors it and
/// the caller, who receives it in [`ChannelEvent::Subscribed`](crate::event::ChannelEvent::Subscribed)
/// to render media. Only the subscription disposes it.
pub struct StreamHandle {
    uri: String,
    scope: StreamScope,
    peer: Arc<dyn PeerConnection>,
    signaling: Arc<dyn SignalingChannel>,
    active: AtomicBool,
    disposed: AtomicBool,
}

impl StreamHandle {
    pub fn new(
        uri: impl Into<String>,
        stream_id: StreamId,
        session_id: SessionId,
        peer: Arc<dyn PeerConnection>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Self {
        Self {
            uri: uri.into(),
            scope: StreamScope {
                stream_id,
                session_id,
            },
            peer,
            signaling,
            active: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Uri of the subscribed stream as published by the presenter.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Stream id assigned by the service for this subscription.
    pub fn stream_id(&self) -> &str {
        &self.scope.stream_id
    }

    /// Session the stream belongs to.
    pub fn session_id(&self) -> &str {
        &self.scope.session_id
    }

    /// Scope used to match stream-ended events.
    pub fn scope(&self) -> &StreamScope {
        &self.scope
    }

    /// The underlying peer connection.
    pub fn peer(&self) -> Arc<dyn PeerConnection> {
        Arc::clone(&self.peer)
    }

    /// Record that the connection has been established.
    ///
    /// Returns `true` only for the first call, so activation is surfaced once
    /// per handle.
    pub fn mark_active(&self) -> bool {
        !self.disposed.load(Ordering::Acquire) && !self.active.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` once the connection has been established.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Close the peer connection and release the stream on the service.
    ///
    /// Idempotent; only the first call does any work and returns `true`.
    /// Failures are logged, never returned.
    pub async fn dispose(&self, reason: &str) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!(stream_id = %self.scope.stream_id, reason, "disposing stream");
        self.peer.close();
        if let Err(e) = self
            .signaling
            .destroy_stream(&self.scope.stream_id, reason)
            .await
        {
            warn!(stream_id = %self.scope.stream_id, "failed to destroy stream: {e}");
        }
        true
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("uri", &self.uri)
            .field("stream_id", &self.scope.stream_id)
            .field("session_id", &self.scope.session_id)
            .field("state", &self.peer.state())
            .field("active", &self.is_active())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
