#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! End-to-end tests: `ChannelExpress` driving a real `SignalingClient` over
//! the scripted `MockTransport` from `tests/common`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use channel_express::monitor::MonitorVerdict;
use channel_express::{
    ChannelEvent, ChannelExpress, ChannelExpressConfig, FailureReason, SignalingChannel,
    SignalingClient, SignalingConfig, StreamEndReason,
};

use common::{
    channel_service, collect_statuses, descriptor, next_event, MockPeerFactory, MockTransport,
    ServiceHandle, StubBehavior, StubMonitorFactory, SESSION_ID, STREAM_ID,
};

fn start(
    monitors: Arc<StubMonitorFactory>,
) -> (ChannelExpress, Arc<SignalingClient>, ServiceHandle) {
    let (transport, service) = MockTransport::new(channel_service());
    let client = Arc::new(SignalingClient::start(
        transport,
        SignalingConfig::new("mock-application").with_request_timeout(Duration::from_secs(1)),
    ));
    let express = ChannelExpress::new(
        client.clone(),
        MockPeerFactory::new(),
        ChannelExpressConfig::new(),
    )
    .with_monitor_factory(monitors);
    (express, client, service)
}

#[tokio::test]
async fn presenter_stream_is_subscribed_over_signaling() {
    let (express, client, service) = start(StubMonitorFactory::new(|_| StubBehavior::Silent));

    let (subscription, mut events) = express.join_channel(descriptor());

    match next_event(&mut events).await {
        Some(ChannelEvent::Subscribed(payload)) => {
            assert_eq!(payload.handle.stream_id(), STREAM_ID);
            assert_eq!(payload.handle.session_id(), SESSION_ID);
            assert_eq!(payload.handle.uri(), "pcast://phenixrts.com/streamId");
        }
        other => panic!("expected Subscribed, got {other:?}"),
    }
    assert!(client.is_authenticated());
    assert_eq!(
        service.sent_types(),
        ["pcast.Authenticate", "chat.JoinRoom", "pcast.SetupStream"]
    );
    let sent = service.sent.lock().unwrap().clone();
    assert_eq!(sent[1]["data"]["alias"], "ChannelAlias");
    assert_eq!(sent[2]["data"]["capabilities"], json!(["real-time"]));

    subscription.dispose();
}

#[tokio::test]
async fn stream_ended_message_ends_subscription() {
    let (express, _client, service) = start(StubMonitorFactory::new(|_| StubBehavior::Silent));

    let (_subscription, mut events) = express.join_channel(descriptor());
    assert!(matches!(
        next_event(&mut events).await,
        Some(ChannelEvent::Subscribed(_))
    ));

    service.push(json!({
        "type": "pcast.StreamEnded",
        "data": { "streamId": STREAM_ID, "reason": "ended", "sessionId": SESSION_ID }
    }));

    match next_event(&mut events).await {
        Some(ChannelEvent::Ended { reason }) => assert_eq!(reason, StreamEndReason::Ended),
        other => panic!("expected Ended, got {other:?}"),
    }
    assert!(next_event(&mut events).await.is_none());

    for _ in 0..100 {
        if service.sent_types().last().map(String::as_str) == Some("pcast.DestroyStream") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let sent = service.sent.lock().unwrap().clone();
    let destroy = sent.last().unwrap();
    assert_eq!(destroy["type"], "pcast.DestroyStream");
    assert_eq!(destroy["data"]["streamId"], STREAM_ID);
    assert_eq!(destroy["data"]["reason"], "ended");
}

#[tokio::test]
async fn client_side_failure_rejoins_over_signaling() {
    let monitors = StubMonitorFactory::new(|index| match index {
        0 => StubBehavior::FailAfter(Duration::from_millis(3), MonitorVerdict::ClientSideFailure),
        _ => StubBehavior::Silent,
    });
    let (express, _client, service) = start(monitors);

    let (subscription, mut events) = express.join_channel(descriptor());

    assert_eq!(
        collect_statuses(&mut events, Duration::from_millis(150)).await,
        ["ok", "ok"]
    );
    assert_eq!(
        service.sent_types(),
        [
            "pcast.Authenticate",
            "chat.JoinRoom",
            "pcast.SetupStream",
            "pcast.DestroyStream",
            "chat.JoinRoom",
            "pcast.SetupStream",
        ]
    );
    subscription.dispose();
}

#[tokio::test]
async fn transport_close_fails_subscription() {
    let (express, client, service) = start(StubMonitorFactory::new(|_| StubBehavior::Silent));

    let (_subscription, mut events) = express.join_channel(descriptor());
    assert!(matches!(
        next_event(&mut events).await,
        Some(ChannelEvent::Subscribed(_))
    ));

    service.push_raw(None);

    match next_event(&mut events).await {
        Some(ChannelEvent::Failed {
            reason: FailureReason::SignalingClosed,
        }) => {}
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(!client.is_connected());
}

#[tokio::test]
async fn client_shutdown_fails_subscription() {
    let (express, client, service) = start(StubMonitorFactory::new(|_| StubBehavior::Silent));

    let (_subscription, mut events) = express.join_channel(descriptor());
    assert!(matches!(
        next_event(&mut events).await,
        Some(ChannelEvent::Subscribed(_))
    ));

    client.shutdown().await;

    assert!(matches!(
        next_event(&mut events).await,
        Some(ChannelEvent::Failed {
            reason: FailureReason::SignalingClosed
        })
    ));
    assert!(service.closed.load(std::sync::atomic::Ordering::Relaxed));
    assert!(client
        .destroy_stream(STREAM_ID, "ended")
        .await
        .is_err());
}
