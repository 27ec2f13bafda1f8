//! Full client against both fake servers

use std::time::Duration;

use chat_client::ChatClient;
use chat_common::ClientError;
use chat_core::Snowflake;
use chat_gateway::SessionState;
use chat_rest::Route;
use integration_tests::{
    next_labels, test_config, within, FakeGateway, FakeRest, Recorder, Scripted,
};
use serde_json::{json, Value};

#[tokio::test]
async fn test_client_connects_caches_and_calls_rest() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let rest = FakeRest::start().await.unwrap();
    rest.script("/users/@me", [Scripted::ok(json!({"id": "1", "username": "bot"}))]);

    let mut config = test_config(&gateway.url, &rest.url);
    config.app.name = "integration".to_string();
    config.shard.index = 1;
    config.shard.count = 2;
    let (recorder, mut seen) = Recorder::new();
    let client = ChatClient::start(&config, recorder).unwrap();

    let mut conn = gateway.accept().await;
    let identify = conn.handshake().await;
    assert_eq!(identify["d"]["shard"], json!([1, 2]));
    assert_eq!(identify["d"]["properties"]["browser"], "integration");

    conn.ready(1, "session-a", &gateway.url);
    conn.dispatch(
        "MESSAGE_CREATE",
        2,
        json!({
            "id": "500",
            "content": "hello",
            "timestamp": "2024-05-01T12:00:00+00:00",
            "author": {"id": "77", "username": "alice"}
        }),
    );
    within(client.wait_until_ready()).await.unwrap();
    assert_eq!(
        next_labels(&mut seen, 3).await,
        vec!["connected:false", "READY", "MESSAGE_CREATE"]
    );

    let cached = client.messages().get(Snowflake::new(500)).unwrap();
    assert_eq!(cached.content(), Some("hello"));
    assert_eq!(client.users().ref_count(Snowflake::new(77)), 1);

    let me: Value = client.rest().get(Route::fixed("/users/@me")).await.unwrap();
    assert_eq!(me["username"], "bot");

    drop(cached);
    client.shutdown().await;
}

#[tokio::test]
async fn test_fatal_session_fails_rest_calls() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let rest = FakeRest::start().await.unwrap();
    let (recorder, _seen) = Recorder::new();
    let client = ChatClient::start(&test_config(&gateway.url, &rest.url), recorder).unwrap();

    let mut conn = gateway.accept().await;
    conn.handshake().await;
    conn.ready(1, "session-a", &gateway.url);
    within(client.wait_until_ready()).await.unwrap();

    conn.close(4014);
    assert_eq!(within(client.gateway().closed()).await, SessionState::Fatal);
    within(async {
        while !client.rest().queue().is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let err = client
        .rest()
        .get::<Value>(Route::fixed("/users/@me"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::SessionFatal(ref reason) if reason.contains("4014")));
    assert!(rest.hits().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let mut gateway = FakeGateway::start(true).await.unwrap();
    let rest = FakeRest::start().await.unwrap();
    let (recorder, mut seen) = Recorder::new();
    let client = ChatClient::start(&test_config(&gateway.url, &rest.url), recorder).unwrap();

    let mut conn = gateway.accept().await;
    conn.handshake().await;
    conn.ready(1, "session-a", &gateway.url);
    next_labels(&mut seen, 2).await;

    let gateway_handle = client.gateway().clone();
    let rest_client = client.rest().clone();
    client.shutdown().await;

    assert_eq!(gateway_handle.state(), SessionState::Disconnected);
    assert_eq!(next_labels(&mut seen, 1).await, vec!["closed:Shutdown"]);
    let err = rest_client
        .get::<Value>(Route::fixed("/users/@me"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::TransportClosed(_)));
}
