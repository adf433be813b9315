//! # Custom Transport Example
//!
//! Runs the whole stack in-process: a loopback [`Transport`], a fake
//! signaling service answering on the other end, and a fake peer connection
//! whose traffic keeps growing so the polling monitor reports it active.
//! After two seconds the service ends the stream.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use channel_express::protocol::{stream_uri, StreamRecord};
use channel_express::{
    ChannelDescriptor, ChannelEvent, ChannelExpress, ChannelExpressConfig, ChannelExpressError,
    PeerConnection, PeerConnectionFactory, PeerConnectionState, SignalingClient, SignalingConfig,
    TrafficStats, Transport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

// ─────────────────────────────────────────────────────────────────────
// Loopback transport
// ─────────────────────────────────────────────────────────────────────

pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

pub struct LoopbackService {
    pub rx: mpsc::UnboundedReceiver<String>,
    pub tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackService) {
    let (client_tx, service_rx) = mpsc::unbounded_channel();
    let (service_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackService {
            rx: service_rx,
            tx: service_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), ChannelExpressError> {
        self.tx
            .send(message)
            .map_err(|e| ChannelExpressError::TransportSend(e.to_string()))
    }

    /// Cancel-safe: `UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, ChannelExpressError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ChannelExpressError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Fake service
// ─────────────────────────────────────────────────────────────────────

fn answer(request: &Value) -> Option<Value> {
    let request_id = request.pointer("/data/requestId")?.clone();
    let response = match request.get("type")?.as_str()? {
        "pcast.Authenticate" => json!({
            "type": "pcast.AuthenticateResponse",
            "data": { "requestId": request_id, "status": "ok", "sessionId": "demoSession" }
        }),
        "chat.JoinRoom" => json!({
            "type": "chat.JoinRoomResponse",
            "data": {
                "requestId": request_id,
                "status": "ok",
                "room": { "roomId": "demoRoom", "alias": "demo", "name": "Demo", "type": "Channel" },
                "members": [{
                    "sessionId": "presenterSession",
                    "screenName": "Presenter",
                    "role": "Presenter",
                    "state": "Active",
                    "streams": [{ "uri": stream_uri("demoStream"), "type": "Presentation" }],
                    "lastUpdate": 1
                }]
            }
        }),
        "pcast.SetupStream" => json!({
            "type": "pcast.SetupStreamResponse",
            "data": { "requestId": request_id, "status": "ok", "streamId": "demoStreamId" }
        }),
        _ => return None,
    };
    Some(response)
}

async fn run_service(mut service: LoopbackService) {
    let stream_end = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(stream_end);
    loop {
        tokio::select! {
            request = service.rx.recv() => {
                let Some(request) = request else { break };
                tracing::info!("service received: {request}");
                let Ok(request) = serde_json::from_str::<Value>(&request) else { continue };
                if let Some(response) = answer(&request) {
                    let _ = service.tx.send(response.to_string());
                }
            }
            () = &mut stream_end => {
                let ended = json!({
                    "type": "pcast.StreamEnded",
                    "data": { "streamId": "demoStreamId", "sessionId": "demoSession", "reason": "ended" }
                });
                let _ = service.tx.send(ended.to_string());
                stream_end.as_mut().reset(Instant::now() + Duration::from_secs(3600));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Fake media
// ─────────────────────────────────────────────────────────────────────

struct DemoPeer {
    started: Instant,
}

impl PeerConnection for DemoPeer {
    fn state(&self) -> PeerConnectionState {
        PeerConnectionState::Connected
    }

    fn traffic(&self) -> TrafficStats {
        let elapsed = self.started.elapsed().as_millis() as u64;
        TrafficStats {
            bytes_received: elapsed * 125,
            packets_received: elapsed / 10,
        }
    }

    fn close(&self) {
        tracing::info!("peer connection closed");
    }
}

struct DemoPeers;

#[async_trait]
impl PeerConnectionFactory for DemoPeers {
    async fn connect(
        &self,
        stream_id: &str,
        _stream: &StreamRecord,
    ) -> Result<Arc<dyn PeerConnection>, ChannelExpressError> {
        tracing::info!("connecting peer for {stream_id}");
        Ok(Arc::new(DemoPeer {
            started: Instant::now(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Wire it together
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, service) = loopback_pair();
    tokio::spawn(run_service(service));

    let signaling = Arc::new(SignalingClient::start(
        transport,
        SignalingConfig::new("demo-application"),
    ));
    let express = ChannelExpress::new(
        signaling.clone(),
        Arc::new(DemoPeers),
        ChannelExpressConfig::new(),
    );

    let (_subscription, mut events) = express.join_channel(ChannelDescriptor::new("demo"));
    while let Some(event) = events.recv().await {
        match &event {
            ChannelEvent::Subscribed(payload) => {
                tracing::info!("subscribed to {}", payload.handle.stream_id());
            }
            ChannelEvent::Active { stream_id } => tracing::info!("{stream_id} is playing"),
            ChannelEvent::NoStreamPlaying { .. } => tracing::info!("waiting for a presenter"),
            ChannelEvent::Ended { reason } => tracing::info!("ended: {}", reason.description()),
            ChannelEvent::Failed { reason } => tracing::warn!("failed: {reason}"),
        }
    }

    signaling.shutdown().await;
    tracing::info!("done");
    Ok(())
}
