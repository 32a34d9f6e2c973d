use super::*;
use crate::error::{ChannelError, ConnectFailure};
use crate::frame::EncodedFrame;
use crate::testing::{refused_endpoint, wait_until, MockAnnotationServer, ServerCommand};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn test_channel(endpoint: &str) -> TransportChannel {
    TransportChannel::with_endpoint(endpoint, Duration::from_secs(2), Duration::from_millis(500))
}

fn test_frame(id: u64) -> EncodedFrame {
    EncodedFrame {
        source_id: id,
        payload: "data:image/jpeg;base64,/9j/AA==".to_string(),
        timestamp_ms: 1_700_000_000_000 + id as i64,
    }
}

async fn next_event(events: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

#[test]
fn test_transition_table() {
    use ChannelState::*;
    assert!(Idle.can_transition_to(Connecting));
    assert!(Connecting.can_transition_to(Open));
    assert!(Connecting.can_transition_to(Errored));
    assert!(Open.can_transition_to(Closing));
    assert!(Open.can_transition_to(Errored));
    assert!(Closing.can_transition_to(Closed));
    assert!(Errored.can_transition_to(Closed));

    assert!(!Idle.can_transition_to(Open));
    assert!(!Open.can_transition_to(Connecting));
    assert!(!Closed.can_transition_to(Connecting));
    assert!(!Closed.can_transition_to(Open));
    assert!(Closed.is_terminal());
}

#[tokio::test]
async fn test_open_send_and_close() {
    let server = MockAnnotationServer::start().await;
    let mut channel = test_channel(&server.endpoint);
    assert_eq!(channel.state(), ChannelState::Idle);

    let mut events = channel.open().await.unwrap();
    assert_eq!(channel.state(), ChannelState::Open);
    assert_eq!(next_event(&mut events).await, ChannelEvent::Ready);

    assert_eq!(channel.send(&test_frame(1)), SendOutcome::Sent);
    wait_until(Duration::from_secs(2), || server.received_count() == 1).await;

    let received = server.received();
    assert_eq!(received[0]["frame"], "data:image/jpeg;base64,/9j/AA==");
    assert_eq!(received[0]["timestamp"], 1_700_000_000_001i64);

    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Closed);
    wait_until(Duration::from_secs(2), || server.open_connections() == 0).await;
}

#[tokio::test]
async fn test_send_when_not_open_is_a_counted_miss() {
    let channel = test_channel("ws://127.0.0.1:1");
    assert_eq!(
        channel.send(&test_frame(1)),
        SendOutcome::Dropped(DropReason::NotOpen)
    );
    assert_eq!(channel.misses(), 1);
}

#[tokio::test]
async fn test_send_after_close_is_dropped() {
    let server = MockAnnotationServer::start().await;
    let mut channel = test_channel(&server.endpoint);
    let _events = channel.open().await.unwrap();
    let sender = channel.sender();

    channel.close().await;
    assert_eq!(
        sender.send(&test_frame(2)),
        SendOutcome::Dropped(DropReason::NotOpen)
    );
    assert_eq!(channel.misses(), 1);
}

#[tokio::test]
async fn test_backlog_never_exceeds_one_frame() {
    let server = MockAnnotationServer::start().await;
    let mut channel = test_channel(&server.endpoint);
    let _events = channel.open().await.unwrap();

    // Sends are synchronous, so the io task has no chance to drain between them
    let outcomes: Vec<_> = (0..5).map(|i| channel.send(&test_frame(i))).collect();
    assert_eq!(outcomes[0], SendOutcome::Sent);
    assert!(outcomes[1..]
        .iter()
        .all(|o| *o == SendOutcome::Dropped(DropReason::Backpressure)));
    assert_eq!(channel.misses(), 4);

    channel.close().await;
}

#[tokio::test]
async fn test_connection_refused() {
    let endpoint = refused_endpoint().await;
    let mut channel = test_channel(&endpoint);

    let err = channel.open().await.unwrap_err();
    assert_eq!(
        err,
        ChannelError::ConnectFailed {
            endpoint: endpoint.clone(),
            reason: ConnectFailure::Refused,
        }
    );
    assert_eq!(channel.state(), ChannelState::Errored);
    assert_eq!(
        err.user_message(),
        "Connection error. Make sure backend server is running."
    );

    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_invalid_endpoint() {
    let mut channel = test_channel("not a url");
    let err = channel.open().await.unwrap_err();
    assert!(matches!(
        err,
        ChannelError::ConnectFailed {
            reason: ConnectFailure::InvalidEndpoint(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_reopen_after_close_is_rejected() {
    let server = MockAnnotationServer::start().await;
    let mut channel = test_channel(&server.endpoint);
    let _events = channel.open().await.unwrap();
    channel.close().await;

    let err = channel.open().await.unwrap_err();
    assert!(matches!(err, ChannelError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_messages_are_delivered_in_order() {
    let server = MockAnnotationServer::start().await;
    let mut channel = test_channel(&server.endpoint);
    let mut events = channel.open().await.unwrap();
    assert_eq!(next_event(&mut events).await, ChannelEvent::Ready);
    wait_until(Duration::from_secs(2), || server.open_connections() == 1).await;

    server.push_text(r#"{"status":"frame_received"}"#);
    server.push_text("{ not json");
    server.push_text(
        r#"{"detections":[{"label":"fire","confidence":0.8,"box":[1,2,3,4]}],"fire_detected":true}"#,
    );

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Message(IncomingMessage::Ack)
    );
    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::ProtocolError(ChannelError::ProtocolError { .. })
    ));
    match next_event(&mut events).await {
        ChannelEvent::Message(IncomingMessage::Annotation(result)) => {
            assert!(result.fire_detected);
            assert_eq!(result.detections.len(), 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // A malformed message does not take the channel down
    assert_eq!(channel.state(), ChannelState::Open);
    channel.close().await;
}

#[tokio::test]
async fn test_peer_reset_reports_error_then_closed() {
    let server = MockAnnotationServer::start().await;
    let mut channel = test_channel(&server.endpoint);
    let mut events = channel.open().await.unwrap();
    assert_eq!(next_event(&mut events).await, ChannelEvent::Ready);
    wait_until(Duration::from_secs(2), || server.open_connections() == 1).await;

    server.push(ServerCommand::Reset);

    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::Error(ChannelError::ConnectionLost { .. })
    ));
    assert_eq!(next_event(&mut events).await, ChannelEvent::Closed);
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(
        channel.send(&test_frame(3)),
        SendOutcome::Dropped(DropReason::NotOpen)
    );

    channel.close().await;
}

#[tokio::test]
async fn test_peer_close_reports_closed_by_peer() {
    let server = MockAnnotationServer::start().await;
    let mut channel = test_channel(&server.endpoint);
    let mut events = channel.open().await.unwrap();
    assert_eq!(next_event(&mut events).await, ChannelEvent::Ready);
    wait_until(Duration::from_secs(2), || server.open_connections() == 1).await;

    server.push(ServerCommand::Close);

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Error(ChannelError::ClosedByPeer)
    );
    assert_eq!(next_event(&mut events).await, ChannelEvent::Closed);
}

#[tokio::test]
async fn test_close_is_idempotent_in_every_state() {
    let mut idle = test_channel("ws://127.0.0.1:1");
    idle.close().await;
    idle.close().await;
    assert_eq!(idle.state(), ChannelState::Closed);

    let server = MockAnnotationServer::start().await;
    let mut open = test_channel(&server.endpoint);
    let _events = open.open().await.unwrap();
    open.close().await;
    open.close().await;
    assert_eq!(open.state(), ChannelState::Closed);
}
