//! Wire envelope codec for the tool-server line protocol.
//!
//! Outbound requests are JSON-RPC 2.0 envelopes whose single outer method is
//! `tools/call`; the domain operation name and its arguments travel inside
//! `params`. Inbound lines are `{id, result|error}` envelopes. A successful
//! `result` frequently carries a second layer of encoding: the actual payload
//! is a JSON document serialised into `result.content[0].text`. That inner
//! layer is unwrapped opportunistically, falling back to the raw outer
//! `result` when the inner decode fails.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{AppError, Result};

/// JSON-RPC protocol version stamped on every outbound envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Outer RPC method wrapping every domain operation.
pub const INVOKE_METHOD: &str = "tools/call";

/// Capability-discovery method used by the readiness probe.
pub const DISCOVERY_METHOD: &str = "tools/list";

/// Sentinel correlation id reserved for the readiness probe.
///
/// The probe is matched by this id directly in the handshake loop and is
/// never registered in the pending-request table.
pub const PROBE_ID: &str = "connection-test";

/// Build an outbound invocation envelope for a domain operation.
///
/// ```json
/// {"jsonrpc":"2.0","method":"tools/call",
///  "params":{"name":"<operation>","arguments":{...}},"id":"<uuid>"}
/// ```
#[must_use]
pub fn invoke_request(id: &str, operation: &str, arguments: &Value) -> Value {
    json!({
        "jsonrpc": PROTOCOL_VERSION,
        "method": INVOKE_METHOD,
        "params": {
            "name": operation,
            "arguments": arguments,
        },
        "id": id,
    })
}

/// Build the readiness-probe envelope sent right after spawn.
#[must_use]
pub fn discovery_request() -> Value {
    json!({
        "jsonrpc": PROTOCOL_VERSION,
        "method": DISCOVERY_METHOD,
        "params": {},
        "id": PROBE_ID,
    })
}

/// Error member of an inbound envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteError {
    /// Server-provided failure description.
    #[serde(default)]
    pub message: Option<String>,
    /// Optional numeric error code.
    #[serde(default)]
    pub code: Option<i64>,
}

impl RemoteError {
    /// Render the error for embedding in [`AppError::Remote`].
    #[must_use]
    pub fn describe(&self) -> String {
        let message = self.message.as_deref().unwrap_or("unspecified error");
        match self.code {
            Some(code) => format!("{message} (code {code})"),
            None => message.to_owned(),
        }
    }
}

/// Inbound wire envelope (tool server → client).
///
/// Server notifications carry no `id`; responses echo the correlation id of
/// the request that produced them. All members are optional so any JSON
/// object decodes — routing decisions belong to the session layer.
#[derive(Debug, Deserialize)]
pub struct ResponseEnvelope {
    /// Echoed correlation id, if this line is a response.
    #[serde(default)]
    pub id: Option<Value>,
    /// Success payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl ResponseEnvelope {
    /// Correlation id as a string, when present.
    ///
    /// Ids are generated client-side as UUID strings, but a numeric echo is
    /// normalised rather than dropped.
    #[must_use]
    pub fn correlation_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Decode one framed line into a [`ResponseEnvelope`].
///
/// # Errors
///
/// Returns [`AppError::Protocol`] when the line is not a JSON object. The
/// caller logs and drops the line; a malformed line never terminates the
/// stream processor.
pub fn decode_line(line: &str) -> Result<ResponseEnvelope> {
    serde_json::from_str(line).map_err(|err| AppError::Protocol(format!("malformed line: {err}")))
}

/// Unwrap the nested payload of a successful `result`.
///
/// The tool server double-encodes domain responses: the outer `result` holds
/// `content: [{text: "<json document>"}]` and the real payload is the parsed
/// `text`. The inner parse is opportunistic — when `content[0].text` is
/// absent or not valid JSON the raw outer `result` is returned unchanged.
/// This mirrors the observed counterpart protocol; whether the double
/// encoding is guaranteed or incidental is a property of the server, so both
/// shapes must keep working.
#[must_use]
pub fn unwrap_payload(result: Value) -> Value {
    let inner = result
        .get("content")
        .and_then(|content| content.get(0))
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .and_then(|text| serde_json::from_str::<Value>(text).ok());

    inner.unwrap_or(result)
}
