//! Typed reasons carried by stream-ended events and terminal subscription events.
//!
//! Stream-ended reasons are wire-compatible with the signaling service, which
//! sends them as `kebab-case` strings (e.g. `"client-side-failure"`). Reasons
//! this crate does not know are preserved verbatim in
//! [`StreamEndReason::Other`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Why the signaling service ended a stream.
///
/// Use [`is_terminal`](StreamEndReason::is_terminal) to decide whether the
/// subscription should end or silently rejoin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamEndReason {
    /// The publisher intentionally ended the stream.
    Ended,
    /// The stream was removed by a moderator.
    Censored,
    /// The publishing application moved to the background.
    AppBackground,
    /// The stream failed on the service side.
    Failed,
    /// The client reported the stream as failed.
    ClientSideFailure,
    /// The media server hosting the stream is entering maintenance.
    Maintenance,
    /// The media server ran out of capacity for this stream.
    Capacity,
    /// The media server is overloaded.
    Overload,
    /// A reason this client does not recognize.
    Other(String),
}

impl StreamEndReason {
    /// Wire representation of the reason.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ended => "ended",
            Self::Censored => "censored",
            Self::AppBackground => "app-background",
            Self::Failed => "failed",
            Self::ClientSideFailure => "client-side-failure",
            Self::Maintenance => "maintenance",
            Self::Capacity => "capacity",
            Self::Overload => "overload",
            Self::Other(reason) => reason,
        }
    }

    /// Returns `true` if the end is authoritative and must not be retried.
    ///
    /// Unknown reasons are treated as terminal so an unfamiliar server-side
    /// decision never turns into a rejoin loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Failed
                | Self::ClientSideFailure
                | Self::Maintenance
                | Self::Capacity
                | Self::Overload
        )
    }

    /// Returns a human-readable description of this reason.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Ended => "The stream was ended by its publisher.",
            Self::Censored => "The stream was removed by a moderator.",
            Self::AppBackground => "The publishing application was sent to the background.",
            Self::Failed => "The stream failed on the media server.",
            Self::ClientSideFailure => "The stream failed on the client side.",
            Self::Maintenance => "The media server is undergoing maintenance.",
            Self::Capacity => "The media server has no capacity left for this stream.",
            Self::Overload => "The media server is overloaded.",
            Self::Other(_) => "The stream ended for an unrecognized reason.",
        }
    }
}

impl From<&str> for StreamEndReason {
    fn from(value: &str) -> Self {
        match value {
            "ended" => Self::Ended,
            "censored" => Self::Censored,
            "app-background" => Self::AppBackground,
            "failed" => Self::Failed,
            "client-side-failure" => Self::ClientSideFailure,
            "maintenance" => Self::Maintenance,
            "capacity" => Self::Capacity,
            "overload" => Self::Overload,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StreamEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StreamEndReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StreamEndReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// Why a subscription terminated with [`ChannelEvent::Failed`](crate::event::ChannelEvent::Failed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The service answered the join request with a non-ok status.
    JoinRejected {
        /// Status string returned by the service.
        status: String,
    },
    /// Every rejoin attempt allowed by the retry policy failed.
    RetriesExhausted {
        /// Number of rejoin attempts made.
        attempts: u32,
        /// Description of the last failure.
        last_error: String,
    },
    /// The signaling client went away for good.
    SignalingClosed,
    /// A join attempt failed in a way retrying cannot fix.
    Unrecoverable {
        /// Description of the error.
        message: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JoinRejected { status } => write!(f, "join rejected: {status}"),
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} rejoin attempts: {last_error}"),
            Self::SignalingClosed => f.write_str("signaling channel closed"),
            Self::Unrecoverable { message } => write!(f, "unrecoverable error: {message}"),
        }
    }
}
