//! Request queue against an in-process HTTP server

use std::time::Duration;

use chat_common::{ClientError, RestConfig};
use chat_rest::{BucketKey, RestClient, RestRequest, RetryMode, Route};
use integration_tests::{within, FakeRest, Scripted};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn client(rest: &FakeRest) -> RestClient {
    let config = RestConfig {
        base_url: rest.url.clone(),
        ..RestConfig::default()
    };
    RestClient::new(&config, "test-token").unwrap()
}

fn messages_route() -> Route {
    Route::new("/channels/{}/messages", &[&1u64])
}

#[tokio::test]
async fn test_exhausted_bucket_waits_for_reset() {
    let rest = FakeRest::start().await.unwrap();
    rest.script("/channels/1/messages", [Scripted::limited("msg", 1, 0, 0.4)]);
    let client = client(&rest);

    let _: Value = client.get(messages_route()).await.unwrap();
    let _: Value = within(client.get(messages_route())).await.unwrap();

    let hits = rest.hits_for("/channels/1/messages");
    assert_eq!(hits.len(), 2);
    assert!(hits[1] - hits[0] >= Duration::from_millis(350));
}

#[tokio::test]
async fn test_global_limit_holds_every_bucket() {
    let rest = FakeRest::start().await.unwrap();
    rest.script("/a", [Scripted::global_429(1.0)]);
    let client = client(&rest);

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>(Route::fixed("/a")).await })
    };
    within(async {
        while rest.hits_for("/a").is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!client.global_gate().is_open());

    let _: Value = within(client.get(Route::fixed("/b"))).await.unwrap();
    within(first).await.unwrap().unwrap();

    let a = rest.hits_for("/a");
    let b = rest.hits_for("/b");
    assert_eq!(a.len(), 2);
    assert!(b[0] - a[0] >= Duration::from_millis(900));
    assert!(a[1] - a[0] >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_shared_hash_merges_buckets() {
    let rest = FakeRest::start().await.unwrap();
    rest.script("/channels/1/pins", [Scripted::limited("shared", 1, 0, 0.5)]);
    rest.script("/channels/1/typing", [Scripted::limited("shared", 1, 0, 0.5)]);
    let client = client(&rest);

    let pins = Route::new("/channels/{}/pins", &[&1u64]);
    let typing = Route::new("/channels/{}/typing", &[&1u64]);
    let pins_key = BucketKey::for_request(&RestRequest::get(pins.clone()));
    let typing_key = BucketKey::for_request(&RestRequest::get(typing.clone()));

    let _: Value = client.get(pins).await.unwrap();
    let _: Value = client.get(typing.clone()).await.unwrap();
    assert_eq!(client.queue().canonical_key(&typing_key), pins_key);

    // Now counted against the shared, exhausted bucket
    let _: Value = within(client.get(typing)).await.unwrap();
    let hits = rest.hits_for("/channels/1/typing");
    assert!(hits[1] - hits[0] >= Duration::from_millis(400));
}

#[tokio::test]
async fn test_rate_limit_surfaces_without_retry() {
    let rest = FakeRest::start().await.unwrap();
    rest.script(
        "/limited",
        [Scripted {
            status: 429,
            headers: Vec::new(),
            body: json!({"message": "slow down", "retry_after": 2.0, "global": false}).to_string(),
        }],
    );
    let client = client(&rest);

    let request = RestRequest::get(Route::fixed("/limited"))
        .with_options(client.default_options().with_retry(RetryMode::empty()));
    let err = client.send(request).await.unwrap_err();

    match err {
        ClientError::RateLimited { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(2)));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_decoded() {
    let rest = FakeRest::start().await.unwrap();
    rest.script("/channels/9", [Scripted::error(404, 10_003, "Unknown Channel")]);
    let client = client(&rest);

    let err = client
        .get::<Value>(Route::new("/channels/{}", &[&9u64]))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    assert!(!err.is_transient());
    match err {
        ClientError::ServerError { code, reason, .. } => {
            assert_eq!(code, Some(10_003));
            assert!(reason.contains("Unknown Channel"));
        }
        other => panic!("expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bad_gateway_retried() {
    let rest = FakeRest::start().await.unwrap();
    rest.script(
        "/flaky",
        [
            Scripted::error(502, 0, "bad gateway"),
            Scripted::ok(json!({"ok": true})),
        ],
    );
    let client = client(&rest);

    let body: Value = within(client.get(Route::fixed("/flaky"))).await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(rest.hits_for("/flaky").len(), 2);
}

#[tokio::test]
async fn test_cancel_aborts_waiting_request() {
    let rest = FakeRest::start().await.unwrap();
    rest.script("/channels/1/messages", [Scripted::limited("msg", 1, 0, 5.0)]);
    let client = client(&rest);
    let _: Value = client.get(messages_route()).await.unwrap();

    let cancel = CancellationToken::new();
    let request = RestRequest::get(messages_route()).with_options(
        client
            .default_options()
            .with_timeout(Duration::from_secs(10))
            .with_cancel(cancel.clone()),
    );
    let started = tokio::time::Instant::now();
    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.send(request).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let err = within(waiting).await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Canceled));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(rest.hits_for("/channels/1/messages").len(), 1);
}

#[tokio::test]
async fn test_deadline_shorter_than_reset_fails_fast() {
    let rest = FakeRest::start().await.unwrap();
    rest.script("/channels/1/messages", [Scripted::limited("msg", 1, 0, 5.0)]);
    let client = client(&rest);
    let _: Value = client.get(messages_route()).await.unwrap();

    let request = RestRequest::get(messages_route())
        .with_options(client.default_options().with_timeout(Duration::from_millis(200)));
    let err = within(client.send(request)).await.unwrap_err();
    assert!(err.is_transient(), "{err:?}");
    assert_eq!(rest.hits_for("/channels/1/messages").len(), 1);
}

#[tokio::test]
async fn test_close_fails_waiting_requests() {
    let rest = FakeRest::start().await.unwrap();
    rest.script("/channels/1/messages", [Scripted::limited("msg", 1, 0, 5.0)]);
    let client = client(&rest);
    let _: Value = client.get(messages_route()).await.unwrap();

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>(messages_route()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    client
        .queue()
        .close(ClientError::SessionFatal("authentication failed".to_string()));

    let err = within(waiting).await.unwrap().unwrap_err();
    assert!(err.is_session_gone());
    let err = client.get::<Value>(Route::fixed("/other")).await.unwrap_err();
    assert!(matches!(err, ClientError::SessionFatal(_)));
}
