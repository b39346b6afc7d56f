//! Unit tests for the wire envelope codec: outbound request shape, inbound
//! decoding, correlation-id normalisation, and nested-payload unwrapping
//! with its raw-result fallback.

use serde_json::{json, Value};

use toolbridge::transport::envelope::{
    decode_line, discovery_request, invoke_request, unwrap_payload, DISCOVERY_METHOD,
    INVOKE_METHOD, PROBE_ID, PROTOCOL_VERSION,
};
use toolbridge::AppError;

// ── Outbound ─────────────────────────────────────────────────────────────────

/// An invocation envelope wraps the operation and its arguments under the
/// single outer `tools/call` method.
#[test]
fn invoke_request_has_expected_shape() {
    let arguments = json!({"profile_id": 7});
    let request = invoke_request("id-123", "get_profile", &arguments);

    assert_eq!(request["jsonrpc"], PROTOCOL_VERSION);
    assert_eq!(request["method"], INVOKE_METHOD);
    assert_eq!(request["params"]["name"], "get_profile");
    assert_eq!(request["params"]["arguments"]["profile_id"], 7);
    assert_eq!(request["id"], "id-123");
}

/// The readiness probe uses the discovery method and the sentinel id.
#[test]
fn discovery_request_uses_sentinel_id() {
    let probe = discovery_request();

    assert_eq!(probe["method"], DISCOVERY_METHOD);
    assert_eq!(probe["id"], PROBE_ID);
    assert_eq!(probe["params"], json!({}));
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// A success envelope decodes with its id and result, and no error.
#[test]
fn decode_success_envelope() {
    let envelope = decode_line(r#"{"id":"abc","result":{"content":[]}}"#)
        .expect("valid envelope must decode");

    assert_eq!(envelope.correlation_id().as_deref(), Some("abc"));
    assert!(envelope.result.is_some());
    assert!(envelope.error.is_none());
}

/// An error envelope carries the server's message and optional code.
#[test]
fn decode_error_envelope() {
    let envelope = decode_line(r#"{"id":"abc","error":{"message":"tool not found","code":-32601}}"#)
        .expect("valid envelope must decode");

    let error = envelope.error.expect("error member present");
    assert_eq!(error.describe(), "tool not found (code -32601)");
}

/// A numeric correlation id is normalised to its decimal string.
#[test]
fn numeric_correlation_id_is_normalised() {
    let envelope = decode_line(r#"{"id":42,"result":{}}"#).expect("decode");
    assert_eq!(envelope.correlation_id().as_deref(), Some("42"));
}

/// A notification (no id) decodes but yields no correlation id.
#[test]
fn notification_has_no_correlation_id() {
    let envelope =
        decode_line(r#"{"method":"log","params":{"message":"hi"}}"#).expect("decode");
    assert!(envelope.correlation_id().is_none());
}

/// Garbage input is a protocol error, never a panic.
#[test]
fn malformed_line_is_protocol_error() {
    let err = decode_line("not json at all").expect_err("garbage must fail");
    match err {
        AppError::Protocol(msg) => assert!(msg.contains("malformed line"), "{msg}"),
        other => panic!("expected AppError::Protocol, got {other:?}"),
    }
}

// ── Nested payload unwrapping ────────────────────────────────────────────────

/// The double-encoded payload in `content[0].text` is parsed and returned.
#[test]
fn unwrap_payload_parses_inner_document() {
    let result = json!({
        "content": [{"text": "{\"gaps\":[1,2,3]}"}]
    });

    let payload = unwrap_payload(result);
    assert_eq!(payload, json!({"gaps": [1, 2, 3]}));
}

/// Inner text that is not valid JSON falls back to the raw outer result.
#[test]
fn unwrap_payload_falls_back_on_invalid_inner_json() {
    let result = json!({
        "content": [{"text": "plain prose, not json"}]
    });

    let payload = unwrap_payload(result.clone());
    assert_eq!(payload, result, "raw outer result must be preserved");
}

/// A result without the nested content shape is returned unchanged.
#[test]
fn unwrap_payload_passes_plain_result_through() {
    let result = json!({"status": "ok", "count": 2});

    let payload = unwrap_payload(result.clone());
    assert_eq!(payload, result);
}

/// An empty content array falls back to the raw outer result.
#[test]
fn unwrap_payload_handles_empty_content() {
    let result = json!({"content": []});

    let payload = unwrap_payload(result.clone());
    assert_eq!(payload, result);
}

/// `null` and non-object results survive unwrapping untouched.
#[test]
fn unwrap_payload_handles_non_object_result() {
    assert_eq!(unwrap_payload(Value::Null), Value::Null);
    assert_eq!(unwrap_payload(json!("done")), json!("done"));
}
