//! Session lifecycle against an in-memory gateway.

mod test_utils;

use cordial_error::GatewayErrorKind;
use cordial_gateway::{
    GatewayEvent, Opcode, ReconnectReason, SessionGroup, SessionState,
};
use cordial_rate_limit::GatewayConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{MockGatewayTransport, MockServer};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, timeout};

const WAIT: Duration = Duration::from_secs(600);

fn config() -> GatewayConfig {
    GatewayConfig::default()
        .with_url("wss://gateway.test")
        .with_backoff(Duration::from_millis(500), Duration::from_secs(5))
}

async fn start(
    config: GatewayConfig,
) -> (
    SessionGroup,
    UnboundedReceiver<GatewayEvent>,
    Arc<MockGatewayTransport>,
    UnboundedReceiver<MockServer>,
) {
    let (transport, servers) = MockGatewayTransport::new();
    let (group, events) = SessionGroup::builder()
        .token("secret-token")
        .intents(513)
        .shard_count(1)
        .config(config)
        .transport(transport.clone())
        .start()
        .await
        .unwrap();
    (group, events, transport, servers)
}

async fn next_server(servers: &mut UnboundedReceiver<MockServer>) -> MockServer {
    timeout(WAIT, servers.recv())
        .await
        .expect("session never connected")
        .expect("transport dropped")
}

/// Next event that is not a dispatch.
async fn next_lifecycle(events: &mut UnboundedReceiver<GatewayEvent>) -> GatewayEvent {
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("no lifecycle event")
            .expect("event stream ended");
        if event.is_lifecycle() {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_identify_carries_token_shard_and_intents() {
    let (_group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    assert_eq!(server.url, "wss://gateway.test/?v=10&encoding=json");

    let identify = server.handshake("abc").await;
    assert_eq!(identify.d["token"], "secret-token");
    assert_eq!(identify.d["shard"], json!([0, 1]));
    assert_eq!(identify.d["intents"], json!(513));

    match next_lifecycle(&mut events).await {
        GatewayEvent::Ready { session_id, shard } => {
            assert_eq!(session_id, "abc");
            assert_eq!(shard.index(), 0);
        }
        other => panic!("expected Ready, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_missed_acks_reconnect_and_resume_with_last_sequence() {
    let (group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;

    server.hello(1_000);
    server.expect_op(Opcode::Identify).await;
    server.ready("abc", 1);
    server.dispatch("MESSAGE_CREATE", 2, json!({"content": "hi"}));
    assert!(matches!(
        next_lifecycle(&mut events).await,
        GatewayEvent::Ready { .. }
    ));

    // No ACKs: the second unanswered beat marks the link as a zombie.
    match next_lifecycle(&mut events).await {
        GatewayEvent::Reconnecting {
            attempt,
            resumable,
            reason,
            ..
        } => {
            assert_eq!(attempt, 1);
            assert!(resumable);
            assert_eq!(
                reason,
                ReconnectReason::Failure(GatewayErrorKind::HeartbeatTimeout)
            );
        }
        other => panic!("expected Reconnecting, got {:?}", other),
    }
    assert_eq!(server.expect_close().await, 4000);

    let mut server = next_server(&mut servers).await;
    assert!(server.url.starts_with("wss://resume.test/"), "{}", server.url);
    server.hello(1_000);
    let (resume, _) = server.expect_op(Opcode::Resume).await;
    assert_eq!(resume.d["session_id"], "abc");
    assert_eq!(resume.d["seq"], json!(2));

    server.resumed(3);
    assert!(matches!(
        next_lifecycle(&mut events).await,
        GatewayEvent::Resumed { .. }
    ));
    let info = group.info(0).unwrap();
    assert_eq!(info.state, SessionState::Ready);
    assert_eq!(info.sequence, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_acked_heartbeats_keep_session_alive() {
    let (group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;

    server.hello(1_000);
    server.expect_op(Opcode::Identify).await;
    server.ready("abc", 1);
    next_lifecycle(&mut events).await;

    for _ in 0..5 {
        server.expect_op(Opcode::Heartbeat).await;
        server.heartbeat_ack();
    }

    assert_eq!(group.state(0), Some(SessionState::Ready));
    assert!(events.try_recv().is_err());
    assert!(group.info(0).unwrap().last_ack.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_non_resumable_invalid_session_identifies_again() {
    let (group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;
    next_lifecycle(&mut events).await;

    server.invalid_session(false);
    assert!(matches!(
        next_lifecycle(&mut events).await,
        GatewayEvent::SessionReset { .. }
    ));
    match next_lifecycle(&mut events).await {
        GatewayEvent::Reconnecting {
            resumable, reason, ..
        } => {
            assert!(!resumable);
            assert_eq!(reason, ReconnectReason::InvalidSession);
        }
        other => panic!("expected Reconnecting, got {:?}", other),
    }
    assert_eq!(server.expect_close().await, 1000);

    let mut server = next_server(&mut servers).await;
    assert!(server.url.starts_with("wss://gateway.test/"));
    server.hello(41_250);
    server.expect_op(Opcode::Identify).await;
    assert_eq!(group.identify_limiter().used(), 2);
    assert_eq!(group.info(0).unwrap().session_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_resumable_invalid_session_resumes() {
    let (_group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;
    next_lifecycle(&mut events).await;

    server.invalid_session(true);
    match next_lifecycle(&mut events).await {
        GatewayEvent::Reconnecting { resumable, .. } => assert!(resumable),
        other => panic!("expected Reconnecting, got {:?}", other),
    }
    assert_eq!(server.expect_close().await, 4000);

    let mut server = next_server(&mut servers).await;
    server.hello(41_250);
    server.expect_op(Opcode::Resume).await;
}

#[tokio::test(start_paused = true)]
async fn test_server_reconnect_request_resumes() {
    let (_group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;
    next_lifecycle(&mut events).await;

    server.request_reconnect();
    match next_lifecycle(&mut events).await {
        GatewayEvent::Reconnecting { reason, .. } => {
            assert_eq!(reason, ReconnectReason::ServerRequested)
        }
        other => panic!("expected Reconnecting, got {:?}", other),
    }

    let mut server = next_server(&mut servers).await;
    server.hello(41_250);
    let (resume, _) = server.expect_op(Opcode::Resume).await;
    assert_eq!(resume.d["seq"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_never_regresses_but_every_dispatch_is_forwarded() {
    let (group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;

    server.dispatch("MESSAGE_CREATE", 5, json!({"n": 1}));
    server.dispatch("MESSAGE_CREATE", 3, json!({"n": 2}));
    server.dispatch("MESSAGE_CREATE", 5, json!({"n": 3}));

    let mut forwarded = Vec::new();
    while forwarded.len() < 3 {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if let GatewayEvent::Dispatch {
            name,
            sequence,
            data,
            ..
        } = event
        {
            if name == "MESSAGE_CREATE" {
                forwarded.push((sequence, data["n"].clone()));
            }
        }
    }

    assert_eq!(
        forwarded,
        vec![
            (Some(5), json!(1)),
            (Some(3), json!(2)),
            (Some(5), json!(3)),
        ]
    );
    assert_eq!(group.info(0).unwrap().sequence, Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_server_heartbeat_request_is_answered_immediately() {
    let (_group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;
    server.dispatch("MESSAGE_CREATE", 7, json!({}));
    next_lifecycle(&mut events).await;

    let requested_at = Instant::now();
    server.request_heartbeat();
    loop {
        let (beat, at) = server.expect_op(Opcode::Heartbeat).await;
        if at >= requested_at {
            assert_eq!(at, requested_at);
            assert_eq!(beat.d, json!(7));
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_fatal_close_code_stops_session() {
    let (group, mut events, transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;
    next_lifecycle(&mut events).await;

    server.close(4004);
    match next_lifecycle(&mut events).await {
        GatewayEvent::Disconnected { fatal, .. } => {
            assert!(matches!(
                fatal,
                Some(GatewayErrorKind::Closed { code: 4004, .. })
            ));
        }
        other => panic!("expected Disconnected, got {:?}", other),
    }
    assert_eq!(group.state(0), Some(SessionState::Disconnected));

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_timeout_close_discards_session() {
    let (_group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;
    next_lifecycle(&mut events).await;

    server.close(4009);
    assert!(matches!(
        next_lifecycle(&mut events).await,
        GatewayEvent::SessionReset { .. }
    ));

    let mut server = next_server(&mut servers).await;
    server.hello(41_250);
    server.expect_op(Opcode::Identify).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_with_normal_code() {
    let (mut group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;
    next_lifecycle(&mut events).await;

    group.shutdown().await;

    assert_eq!(server.expect_close().await, 1000);
    assert!(matches!(
        next_lifecycle(&mut events).await,
        GatewayEvent::Disconnected { fatal: None, .. }
    ));
    assert_eq!(group.state(0), Some(SessionState::Disconnected));
    let err = group
        .send(0, cordial_gateway::GatewayPayload::presence_update(json!({})))
        .unwrap_err();
    assert_eq!(err.kind, GatewayErrorKind::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_missing_hello_times_out() {
    let (_group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;

    let opened = Instant::now();
    match next_lifecycle(&mut events).await {
        GatewayEvent::Reconnecting { reason, .. } => {
            assert!(matches!(
                reason,
                ReconnectReason::Failure(GatewayErrorKind::Handshake(_))
            ));
        }
        other => panic!("expected Reconnecting, got {:?}", other),
    }
    assert!(Instant::now() - opened >= Duration::from_secs(20));
    assert_eq!(server.expect_close().await, 4000);
    next_server(&mut servers).await;
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_retries() {
    let transport = MockGatewayTransport::refusing();
    let (_group, mut events) = SessionGroup::builder()
        .token("secret-token")
        .intents(0)
        .config(config().with_max_retries(Some(2)))
        .transport(transport.clone())
        .start()
        .await
        .unwrap();

    let mut attempts = Vec::new();
    loop {
        match next_lifecycle(&mut events).await {
            GatewayEvent::Reconnecting { attempt, .. } => attempts.push(attempt),
            GatewayEvent::Disconnected { fatal, .. } => {
                assert!(matches!(fatal, Some(GatewayErrorKind::Connection(_))));
                break;
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(transport.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_outbound_payloads_wait_for_ready() {
    let (group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;

    group.update_presence(json!({"status": "idle"})).unwrap();
    server.hello(41_250);
    server.expect_op(Opcode::Identify).await;
    server.ready("abc", 1);
    next_lifecycle(&mut events).await;

    let (presence, _) = server.expect_op(Opcode::PresenceUpdate).await;
    assert_eq!(presence.d["status"], "idle");
}

#[tokio::test(start_paused = true)]
async fn test_requested_reconnect_resumes() {
    let (group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;
    next_lifecycle(&mut events).await;

    group.reconnect(0).unwrap();
    match next_lifecycle(&mut events).await {
        GatewayEvent::Reconnecting { reason, .. } => {
            assert_eq!(reason, ReconnectReason::Requested)
        }
        other => panic!("expected Reconnecting, got {:?}", other),
    }
    assert_eq!(server.expect_close().await, 4000);

    let mut server = next_server(&mut servers).await;
    server.hello(41_250);
    server.expect_op(Opcode::Resume).await;
}

#[tokio::test(start_paused = true)]
async fn test_first_heartbeat_lands_within_one_interval() {
    let (group, mut events, _transport, mut servers) = start(config()).await;
    let mut server = next_server(&mut servers).await;
    server.handshake("abc").await;
    next_lifecycle(&mut events).await;

    let interval = Duration::from_secs(10);
    for _ in 0..20 {
        group.reconnect(0).unwrap();
        server = next_server(&mut servers).await;
        let hello_at = Instant::now();
        server.hello(interval.as_millis() as u64);
        server.expect_op(Opcode::Resume).await;
        let (_, beat_at) = server.expect_op(Opcode::Heartbeat).await;
        assert!(
            beat_at - hello_at <= interval,
            "first beat after {:?}",
            beat_at - hello_at
        );
    }
}
