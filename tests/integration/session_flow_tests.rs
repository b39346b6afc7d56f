//! End-to-end request/response flows against fake tool servers: correlation
//! under permuted delivery, nested-payload unwrapping, timeouts, and
//! poisoned-stream tolerance.

use std::time::Duration;

use serde_json::json;

use toolbridge::{AppError, ToolServerClient};

use super::test_helpers::{
    FakeServer, ECHO_SERVER, ERROR_SERVER, LATE_SERVER, NOISY_SERVER, PLAIN_RESULT_SERVER,
    SILENT_SERVER, SWAP_SERVER,
};

/// A round trip through the real spawn/handshake/stream path unwraps the
/// double-encoded payload.
#[tokio::test]
async fn roundtrip_unwraps_nested_payload() {
    let server = FakeServer::new(ECHO_SERVER);
    let (client, _events) = ToolServerClient::start(server.config());

    client.connect().await.expect("connect");
    let result = client
        .send_request("list_profiles", json!({}))
        .await
        .expect("request succeeds");

    assert_eq!(result, json!({"op": "list_profiles"}));
    client.shutdown();
}

/// Two concurrent requests whose responses arrive in reverse order each
/// resolve with their own result.
#[tokio::test]
async fn out_of_order_responses_resolve_their_own_callers() {
    let server = FakeServer::new(SWAP_SERVER);
    let (client, _events) = ToolServerClient::start(server.config());

    client.connect().await.expect("connect");

    let (a, b) = tokio::join!(
        client.send_request("get_x", json!({})),
        client.send_request("get_y", json!({})),
    );

    assert_eq!(a.expect("get_x resolves"), json!({"op": "get_x"}));
    assert_eq!(b.expect("get_y resolves"), json!({"op": "get_y"}));
    client.shutdown();
}

/// A result without the nested content shape is passed through unchanged.
#[tokio::test]
async fn plain_result_passes_through() {
    let server = FakeServer::new(PLAIN_RESULT_SERVER);
    let (client, _events) = ToolServerClient::start(server.config());

    client.connect().await.expect("connect");
    let result = client
        .send_request("get_status", json!({}))
        .await
        .expect("request succeeds");

    assert_eq!(result, json!({"status": "ok"}));
    client.shutdown();
}

/// An error envelope rejects the caller with the server's message.
#[tokio::test]
async fn error_envelope_rejects_caller() {
    let server = FakeServer::new(ERROR_SERVER);
    let (client, _events) = ToolServerClient::start(server.config());

    client.connect().await.expect("connect");
    let err = client
        .send_request("delete_profile", json!({"id": 1}))
        .await
        .expect_err("server rejects");

    assert!(matches!(err, AppError::Remote(_)), "got {err:?}");
    let rendered = err.to_string();
    assert!(rendered.contains("operation rejected"), "{rendered}");
    client.shutdown();
}

/// With a 50 ms deadline and a server that never answers, the caller is
/// rejected with a timeout naming the operation, and the request is evicted
/// from the pending table.
#[tokio::test]
async fn request_times_out_and_is_evicted() {
    let server = FakeServer::new(SILENT_SERVER);
    let mut config = server.config();
    config.timeouts.request_ms = 50;
    let (client, _events) = ToolServerClient::start(config);

    client.connect().await.expect("connect");
    let err = client
        .send_request("get_x", json!({}))
        .await
        .expect_err("deadline must fire");

    let rendered = err.to_string();
    assert!(rendered.contains("timeout"), "{rendered}");
    assert!(rendered.contains("get_x"), "{rendered}");

    let stats = client.connection_stats().await.expect("stats");
    assert!(stats.connected, "timeout must not tear the session down");
    assert_eq!(stats.pending_requests, 0, "timed-out entry must be evicted");
    client.shutdown();
}

/// A response that finally arrives for an already-timed-out request is
/// ignored, and the session keeps serving later requests.
#[tokio::test]
async fn late_response_after_timeout_is_ignored() {
    let server = FakeServer::new(LATE_SERVER);
    let mut config = server.config();
    // Short enough that the one-second-delayed response misses it, long
    // enough that the follow-up echo round trip fits comfortably.
    config.timeouts.request_ms = 250;
    let (client, _events) = ToolServerClient::start(config);

    client.connect().await.expect("connect");
    let err = client
        .send_request("slow_op", json!({}))
        .await
        .expect_err("first request must time out");
    assert!(err.to_string().contains("timeout"));

    // Let the server's delayed (now unmatched) response drain through.
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let result = client
        .send_request("get_x", json!({}))
        .await
        .expect("later request must still work");
    assert_eq!(result, json!({"op": "get_x"}));

    let stats = client.connection_stats().await.expect("stats");
    assert_eq!(stats.pending_requests, 0);
    client.shutdown();
}

/// Garbage lines and unknown correlation ids interleaved with the real
/// response do not affect it.
#[tokio::test]
async fn malformed_and_unknown_lines_do_not_poison_stream() {
    let server = FakeServer::new(NOISY_SERVER);
    let (client, _events) = ToolServerClient::start(server.config());

    client.connect().await.expect("connect");
    let result = client
        .send_request("get_x", json!({}))
        .await
        .expect("real response must still arrive");

    assert_eq!(result, json!({"right": true}));
    client.shutdown();
}

/// A request issued before `connect` fails fast with `NotConnected` and
/// spawns nothing.
#[tokio::test]
async fn send_while_disconnected_fails_fast() {
    let server = FakeServer::new(ECHO_SERVER);
    let (client, _events) = ToolServerClient::start(server.config());

    let err = client
        .send_request("get_x", json!({}))
        .await
        .expect_err("must fail without a connection");

    assert!(matches!(err, AppError::NotConnected(_)), "got {err:?}");
    assert!(err.to_string().contains("get_x"));
    client.shutdown();
}
