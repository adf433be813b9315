//! # Channel Express
//!
//! Join a broadcast channel by alias, subscribe to its presenter's stream and
//! keep that subscription alive.
//!
//! [`ChannelExpress`] watches every subscribed stream through a
//! [`PeerConnectionMonitor`]. When the monitor reports a failure the stream is
//! torn down and the channel is silently rejoined with bounded backoff. When
//! the signaling service ends the stream authoritatively, the subscription
//! ends. Everything the caller needs to know arrives as [`ChannelEvent`]s on
//! one receiver per join.
//!
//! ## Layers
//!
//! - [`Transport`]: bidirectional text channel to the signaling service
//!   ([`WebSocketTransport`] with the default `transport-websocket` feature).
//! - [`SignalingClient`]: authenticates and correlates requests over a
//!   transport; implements [`SignalingChannel`].
//! - [`PeerConnectionFactory`]: creates the media connection for a stream.
//!   Supplied by the application.
//! - [`ChannelExpress`]: the join, monitor and rejoin engine.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect("wss://signaling.example.com/ws").await?;
//! let signaling = Arc::new(SignalingClient::start(transport, SignalingConfig::new("app")));
//! let express = ChannelExpress::new(signaling, peers, ChannelExpressConfig::new());
//!
//! let (subscription, mut events) = express.join_channel(ChannelDescriptor::new("ChannelAlias"));
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event.status());
//! }
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod express;
pub mod monitor;
pub mod peer;
pub mod protocol;
pub mod reason;
pub mod signaling;
pub mod stream;
pub mod subscription;
pub mod transport;
pub mod transports;

pub use client::{SignalingClient, SignalingConfig};
pub use error::{ChannelExpressError, Result};
pub use event::{ChannelEvent, ChannelEvents, SubscribedPayload};
pub use express::{ChannelExpress, ChannelExpressConfig, ChannelSubscriptionHandle, RetryPolicy};
pub use monitor::{
    MonitorFactory, MonitorOptions, MonitorSignal, MonitorSink, MonitorVerdict,
    PeerConnectionMonitor, PollingMonitor, PollingMonitorFactory,
};
pub use peer::{PeerConnection, PeerConnectionFactory, PeerConnectionState, TrafficStats};
pub use protocol::{ChannelDescriptor, ClientMessage, ServerMessage};
pub use reason::{FailureReason, StreamEndReason};
pub use signaling::{SignalingChannel, SignalingEvent, StreamScope};
pub use stream::StreamHandle;
pub use subscription::SubscriptionStatus;
pub use transport::Transport;
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
