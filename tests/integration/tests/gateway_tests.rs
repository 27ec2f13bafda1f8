//! Gateway session against an in-process WebSocket server

use std::sync::Arc;
use std::time::Duration;

use chat_core::{Intents, Snowflake};
use chat_gateway::protocol::{Activity, Status};
use chat_gateway::{
    Backoff, CommandLimits, DispatchMode, EventDispatchQueue, EventHandler, GatewayHandle,
    GatewayOptions, GatewaySession, PresenceUpdatePayload, RequestGuildMembersPayload,
    SessionState, WebSocketTransport,
};
use chat_common::ClientError;
use chat_rest::GlobalGate;
use governor::Quota;
use integration_tests::{next_labels, within, FakeGateway, Recorder};
use serde_json::json;
use std::num::NonZeroU32;

fn start(url: &str, handler: Arc<dyn EventHandler>, max_frame_size: usize) -> GatewayHandle {
    let fast = Quota::per_second(NonZeroU32::new(100).unwrap());
    let options = GatewayOptions::new(url, "test-token", Intents::GUILDS | Intents::GUILD_MESSAGES)
        .with_limits(CommandLimits::new(fast, fast))
        .with_backoff(Backoff::new(Duration::from_millis(10), Duration::from_millis(50)))
        .with_max_reconnect_failures(3);

    GatewaySession::start(
        options,
        Arc::new(WebSocketTransport::new(max_frame_size)),
        EventDispatchQueue::new(DispatchMode::default(), handler),
        Arc::new(GlobalGate::new()),
    )
}

#[tokio::test]
async fn test_identify_and_ordered_delivery() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 4096);

    let mut conn = gateway.accept().await;
    let identify = conn.handshake().await;
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "test-token");
    assert_eq!(identify["d"]["intents"], 513);

    conn.ready(1, "session-a", &gateway.url);
    for seq in 2..=6 {
        conn.dispatch("MESSAGE_CREATE", seq, json!({"id": seq.to_string()}));
    }
    conn.dispatch("TYPING_START", 7, json!({}));

    within(handle.wait_until_ready()).await.unwrap();
    let labels = next_labels(&mut seen, 8).await;
    assert_eq!(labels[0], "connected:false");
    assert_eq!(labels[1], "READY");
    assert!(labels[2..7].iter().all(|l| l == "MESSAGE_CREATE"));
    assert_eq!(labels[7], "TYPING_START");

    handle.shutdown().await;
    assert_eq!(handle.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_resumable_close_resumes_at_resume_url() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 4096);
    let resume_url = format!("{}/?resume=1", gateway.url);

    let mut conn = gateway.accept().await;
    conn.handshake().await;
    conn.ready(1, "session-a", &resume_url);
    conn.dispatch("MESSAGE_CREATE", 2, json!({"id": "10"}));
    assert_eq!(
        next_labels(&mut seen, 3).await,
        vec!["connected:false", "READY", "MESSAGE_CREATE"]
    );

    conn.close(4000);
    assert_eq!(next_labels(&mut seen, 1).await, vec!["closed:Resume"]);

    let mut conn = gateway.accept().await;
    assert!(conn.uri.contains("resume=1"), "{}", conn.uri);
    let resume = conn.handshake().await;
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["session_id"], "session-a");
    assert_eq!(resume["d"]["seq"], 2);

    // Replayed creation is dropped; new ones still arrive
    conn.dispatch("MESSAGE_CREATE", 2, json!({"id": "10"}));
    conn.dispatch("RESUMED", 3, json!({}));
    conn.dispatch("MESSAGE_CREATE", 4, json!({"id": "11"}));
    assert_eq!(
        next_labels(&mut seen, 3).await,
        vec!["connected:true", "RESUMED", "MESSAGE_CREATE"]
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn test_session_close_code_forces_identify() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 4096);

    let mut conn = gateway.accept().await;
    conn.handshake().await;
    conn.ready(5, "session-a", &format!("{}/?resume=1", gateway.url));
    next_labels(&mut seen, 2).await;

    // Session timed out
    conn.close(4009);
    assert_eq!(next_labels(&mut seen, 1).await, vec!["closed:Reidentify"]);

    let mut conn = gateway.accept().await;
    assert!(!conn.uri.contains("resume"), "{}", conn.uri);
    let identify = conn.handshake().await;
    assert_eq!(identify["op"], 2);
    assert!(identify["d"].get("seq").is_none());

    conn.ready(1, "session-b", &gateway.url);
    assert_eq!(
        next_labels(&mut seen, 2).await,
        vec!["connected:false", "READY"]
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn test_invalid_session_reidentifies_after_wait() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 4096);

    let mut conn = gateway.accept().await;
    conn.handshake().await;
    conn.ready(1, "session-a", &gateway.url);
    next_labels(&mut seen, 2).await;

    conn.invalid_session(false);
    let started = tokio::time::Instant::now();
    assert_eq!(next_labels(&mut seen, 1).await, vec!["closed:Reidentify"]);

    let mut conn = gateway.accept().await;
    assert!(started.elapsed() >= Duration::from_millis(900));
    let identify = conn.handshake().await;
    assert_eq!(identify["op"], 2);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_server_reconnect_request_resumes() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 4096);

    let mut conn = gateway.accept().await;
    conn.handshake().await;
    conn.ready(3, "session-a", &gateway.url);
    next_labels(&mut seen, 2).await;

    conn.send(json!({"op": 7, "d": null}));
    let mut conn = gateway.accept().await;
    let resume = conn.handshake().await;
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["seq"], 3);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_fatal_close_stops_session() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 4096);

    let mut conn = gateway.accept().await;
    conn.handshake().await;
    conn.ready(1, "session-a", &gateway.url);
    next_labels(&mut seen, 2).await;

    conn.close(4004);
    assert_eq!(within(handle.closed()).await, SessionState::Fatal);
    assert!(handle.fatal_reason().unwrap().contains("4004"));
    assert_eq!(next_labels(&mut seen, 1).await, vec!["closed:Fatal"]);

    let err = handle
        .update_presence(&PresenceUpdatePayload::new(Status::Idle))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::SessionFatal(_)));
    assert!(err.is_session_gone());
    assert!(gateway.try_accept(Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn test_unreachable_gateway_goes_fatal() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let handle = start(&url, Arc::new(chat_gateway::NoopHandler), 4096);
    assert_eq!(within(handle.closed()).await, SessionState::Fatal);
    assert!(handle.fatal_reason().unwrap().contains("3 failed reconnect attempts"));
}

#[tokio::test]
async fn test_stalled_handshake_counts_as_failed_attempt() {
    // Accepts TCP connections and never answers the upgrade
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let _silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((tcp, _)) = listener.accept().await {
            held.push(tcp);
        }
    });

    let fast = Quota::per_second(NonZeroU32::new(100).unwrap());
    let options = GatewayOptions::new(url.as_str(), "test-token", Intents::GUILDS)
        .with_limits(CommandLimits::new(fast, fast))
        .with_backoff(Backoff::new(Duration::from_millis(10), Duration::from_millis(50)))
        .with_max_reconnect_failures(3);
    let transport = WebSocketTransport::new(4096).with_connect_timeout(Duration::from_millis(200));
    let handle = GatewaySession::start(
        options,
        Arc::new(transport),
        EventDispatchQueue::new(DispatchMode::default(), Arc::new(chat_gateway::NoopHandler)),
        Arc::new(GlobalGate::new()),
    );

    assert_eq!(within(handle.closed()).await, SessionState::Fatal);
    assert!(handle.fatal_reason().unwrap().contains("3 failed reconnect attempts"));
}

#[tokio::test]
async fn test_heartbeats_acked_report_latency() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 4096);

    let mut conn = gateway.accept().await;
    conn.hello(100);
    conn.recv_op(2).await;
    conn.ready(1, "session-a", &gateway.url);
    next_labels(&mut seen, 2).await;

    // A beat may go out before READY is seen; later ones carry its sequence
    while conn.recv_op(1).await["d"] != 1 {}
    within(async {
        while handle.latency().is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    // Several more intervals pass without a reconnect
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.state(), SessionState::Ready);
    assert!(gateway.try_accept(Duration::from_millis(50)).await.is_none());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_missed_heartbeat_ack_reconnects() {
    let mut gateway = FakeGateway::start(false).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 4096);

    let mut conn = gateway.accept().await;
    conn.hello(100);
    conn.recv_op(2).await;
    conn.ready(1, "session-a", &gateway.url);
    next_labels(&mut seen, 2).await;

    assert_eq!(next_labels(&mut seen, 1).await, vec!["closed:Resume"]);
    let mut conn = gateway.accept().await;
    let resume = conn.handshake().await;
    assert_eq!(resume["op"], 6);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frames_do_not_break_session() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 4096);

    let mut conn = gateway.accept().await;
    conn.handshake().await;
    conn.send_raw("{definitely not json");
    conn.send(json!({"op": 42, "d": null}));
    conn.send(json!({"op": 0, "s": 1, "d": {}}));
    conn.ready(2, "session-a", &gateway.url);

    assert_eq!(
        next_labels(&mut seen, 2).await,
        vec!["connected:false", "READY"]
    );
    assert_eq!(handle.state(), SessionState::Ready);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_commands_and_oversized_frames() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let handle = start(&gateway.url, recorder, 256);

    let mut conn = gateway.accept().await;
    conn.handshake().await;
    conn.ready(1, "session-a", &gateway.url);
    next_labels(&mut seen, 2).await;

    let long_name = "x".repeat(2_000);
    handle
        .update_presence(
            &PresenceUpdatePayload::new(Status::Online).with_activity(Activity::playing(&long_name)),
        )
        .await
        .unwrap();
    let presence = conn.recv_op(3).await;
    assert_eq!(presence["d"]["status"], "online");
    assert_eq!(presence["d"]["activities"][0]["name"], long_name.as_str());

    handle
        .request_guild_members(&RequestGuildMembersPayload::all(Snowflake::new(42)).with_nonce("n-1"))
        .await
        .unwrap();
    let request = conn.recv_op(8).await;
    assert_eq!(request["d"]["guild_id"], "42");
    assert_eq!(request["d"]["nonce"], "n-1");

    handle.shutdown().await;
}
