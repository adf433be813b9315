//! Error types for the channel express client.

use thiserror::Error;

/// Errors that can occur while talking to the signaling service or while
/// establishing a stream subscription.
#[derive(Debug, Error)]
pub enum ChannelExpressError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the client is not connected.
    #[error("not connected to signaling service")]
    NotConnected,

    /// The signaling service refused the authentication request.
    #[error("authentication failed with status '{status}'")]
    AuthenticationFailed {
        /// Status string returned by the service.
        status: String,
    },

    /// The signaling service returned a non-ok status for a room join.
    #[error("join rejected with status '{status}'")]
    JoinRejected {
        /// Status string returned by the service.
        status: String,
    },

    /// The signaling service returned a non-ok status for a stream setup.
    #[error("stream setup rejected with status '{status}'")]
    StreamSetupRejected {
        /// Status string returned by the service.
        status: String,
    },

    /// The service answered a request with a message of the wrong type.
    #[error("unexpected response to {request}")]
    UnexpectedResponse {
        /// Wire name of the request that was answered.
        request: &'static str,
    },

    /// The peer connection for a stream could not be created.
    #[error("peer connection error: {0}")]
    PeerConnection(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelExpressError {
    /// Returns `true` if a later attempt may succeed without caller action.
    ///
    /// Rejections carrying an explicit status from the service are final;
    /// everything caused by the connection or the peer is worth retrying.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::JoinRejected { .. } | Self::AuthenticationFailed { .. } | Self::Serialization(_)
        )
    }
}

/// A specialized [`Result`] type for channel express operations.
pub type Result<T> = std::result::Result<T, ChannelExpressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_not_recoverable() {
        let err = ChannelExpressError::JoinRejected {
            status: "not-found".into(),
        };
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "join rejected with status 'not-found'");
    }

    #[test]
    fn connection_problems_are_recoverable() {
        assert!(ChannelExpressError::Timeout.is_recoverable());
        assert!(ChannelExpressError::NotConnected.is_recoverable());
        assert!(ChannelExpressError::StreamSetupRejected {
            status: "capacity".into()
        }
        .is_recoverable());
    }
}
