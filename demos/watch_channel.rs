//! # Watch a Channel
//!
//! Connects to a signaling endpoint over WebSocket, joins a channel and logs
//! its subscription events until the stream ends or Ctrl-C is pressed.
//!
//! No media stack is attached: the peer connection is a placeholder that
//! always reports itself connected, so stall detection is turned off.
//!
//! ## Running
//!
//! ```sh
//! CHANNEL_EXPRESS_URL=wss://signaling.example.com/ws \
//! CHANNEL_EXPRESS_APP=my-application \
//! CHANNEL_ALIAS=ChannelAlias \
//! cargo run --example watch_channel
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use channel_express::protocol::StreamRecord;
use channel_express::{
    ChannelDescriptor, ChannelEvent, ChannelExpress, ChannelExpressConfig, ChannelExpressError,
    MonitorOptions, PeerConnection, PeerConnectionFactory, PeerConnectionState, SignalingClient,
    SignalingConfig, TrafficStats, WebSocketTransport,
};

const DEFAULT_URL: &str = "ws://localhost:8080/ws";

struct PlaceholderPeer;

impl PeerConnection for PlaceholderPeer {
    fn state(&self) -> PeerConnectionState {
        PeerConnectionState::Connected
    }

    fn traffic(&self) -> TrafficStats {
        TrafficStats::default()
    }

    fn close(&self) {}
}

struct PlaceholderPeers;

#[async_trait]
impl PeerConnectionFactory for PlaceholderPeers {
    async fn connect(
        &self,
        _stream_id: &str,
        _stream: &StreamRecord,
    ) -> Result<Arc<dyn PeerConnection>, ChannelExpressError> {
        Ok(Arc::new(PlaceholderPeer))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set `RUST_LOG=channel_express=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let url = std::env::var("CHANNEL_EXPRESS_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let application = std::env::var("CHANNEL_EXPRESS_APP").unwrap_or_else(|_| "demo".into());
    let alias = std::env::var("CHANNEL_ALIAS").unwrap_or_else(|_| "ChannelAlias".into());

    let transport = WebSocketTransport::connect_with_timeout(&url, Duration::from_secs(10)).await?;
    let mut signaling_config = SignalingConfig::new(application);
    if let Ok(token) = std::env::var("CHANNEL_EXPRESS_TOKEN") {
        signaling_config = signaling_config.with_authentication_token(token);
    }
    let signaling = Arc::new(SignalingClient::start(transport, signaling_config));

    let config = ChannelExpressConfig::new()
        .with_monitor_options(MonitorOptions::new().with_stall_threshold(Duration::ZERO));
    let express = ChannelExpress::new(signaling.clone(), Arc::new(PlaceholderPeers), config);

    let (subscription, mut events) = express.join_channel(ChannelDescriptor::new(alias));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                subscription.dispose();
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                tracing::info!(status = ?event.status(), "{event:?}");
            }
        }
    }

    express.dispose();
    signaling.shutdown().await;
    Ok(())
}
