//! JSON-RPC 2.0 message types (§4.6).
//!
//! Grounded in `crates/codex/src/mcp/jsonrpc.rs`'s wire types (`RpcResponse`/
//! `RpcNotification`/`RpcError`) and `decode_message`'s id/method-based
//! classification, generalized into an owned, round-trippable
//! `JsonRpcMessage` enum (the source only ever deserializes one-way, since it
//! is purely a client; mcpadre proxies, so it must be able to re-serialize
//! every message kind too).

pub mod stream;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const PARSE_ERROR_CODE: i64 = -32700;
pub const INVALID_REQUEST_CODE: i64 = -32600;
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// A JSON-RPC request/response id: either a number or a string, never null
/// (notifications carry no id at all, represented by the absence of this
/// type rather than a null variant).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum JsonRpcError {
    #[error("malformed JSON on line `{line}`: {source}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("line `{line}` is not a valid JSON-RPC 2.0 request/response/notification")]
    InvalidRequest { line: String },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("i/o error on JSON-RPC stream: {0}")]
    Io(#[from] std::io::Error),
}

impl JsonRpcError {
    /// The JSON-RPC error code this failure maps onto when mcpadre must
    /// synthesize an error response back to the caller instead of dropping
    /// the malformed line silently (§4.6, Testable Property: "never silently
    /// drop a line").
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcError::Parse { .. } => PARSE_ERROR_CODE,
            JsonRpcError::InvalidRequest { .. } => INVALID_REQUEST_CODE,
            JsonRpcError::Serialize(_) | JsonRpcError::Io(_) => INTERNAL_ERROR_CODE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// `None` serializes as JSON `null`, used when a response cannot be
    /// correlated to a request id at all (e.g. a line that failed to parse
    /// before its `id` field could even be read; §4.6, §8 scenario S6).
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

/// Any one line of a JSON-RPC stream, classified by presence of `id` and
/// `method` the same way `decode_message` does in the source, but keeping
/// the owned value around so it can be forwarded verbatim.
#[derive(Clone, Debug, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.id),
            JsonRpcMessage::Notification(_) => None,
            JsonRpcMessage::Response(r) => r.id.as_ref(),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            JsonRpcMessage::Response(_) => None,
        }
    }

    pub fn error_response(id: RequestId, code: i64, message: impl Into<String>) -> JsonRpcMessage {
        Self::error_response_opt(Some(id), code, message)
    }

    /// Build an error response with no correlated request id (serializes as
    /// `"id":null`): used for a line that failed to parse before any `id`
    /// could be read (§4.6, §8 scenario S6).
    pub fn error_response_opt(id: Option<RequestId>, code: i64, message: impl Into<String>) -> JsonRpcMessage {
        JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        })
    }

    pub fn to_line(&self) -> Result<String, JsonRpcError> {
        let value = match self {
            JsonRpcMessage::Request(r) => serde_json::to_value(r)?,
            JsonRpcMessage::Notification(n) => serde_json::to_value(n)?,
            JsonRpcMessage::Response(r) => serde_json::to_value(r)?,
        };
        Ok(serde_json::to_string(&value)?)
    }

    /// Classify a decoded JSON value per the source's id/method heuristic:
    /// id+method => request, method alone => notification, id alone => response
    /// (only when it is actually response-shaped). §4.6: a missing/wrong
    /// `jsonrpc` field, or a request-shaped line missing `method`, is an
    /// Invalid-Request (-32600), not a silent misclassification.
    pub fn from_value(value: Value, raw_line: &str) -> Result<Self, JsonRpcError> {
        let invalid = || JsonRpcError::InvalidRequest {
            line: raw_line.to_string(),
        };

        if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(invalid());
        }

        let has_id = value.get("id").is_some();
        let has_method = value.get("method").is_some();

        if has_method {
            if has_id {
                let request: JsonRpcRequest =
                    serde_json::from_value(value).map_err(|source| JsonRpcError::Parse {
                        line: raw_line.to_string(),
                        source,
                    })?;
                return Ok(JsonRpcMessage::Request(request));
            }

            let notification: JsonRpcNotification =
                serde_json::from_value(value).map_err(|source| JsonRpcError::Parse {
                    line: raw_line.to_string(),
                    source,
                })?;
            return Ok(JsonRpcMessage::Notification(notification));
        }

        // No `method`: only a response shape (exactly one of `result`/`error`
        // present) is valid here. An id with neither is not a response at
        // all, just a malformed message missing the method a request needs.
        if has_id && (value.get("result").is_some() || value.get("error").is_some()) {
            let response: JsonRpcResponse =
                serde_json::from_value(value).map_err(|source| JsonRpcError::Parse {
                    line: raw_line.to_string(),
                    source,
                })?;
            return Ok(JsonRpcMessage::Response(response));
        }

        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_request_notification_and_response() {
        let req = JsonRpcMessage::from_value(
            serde_json::json!({"jsonrpc":"2.0","id":1,"method":"ping"}),
            "",
        )
        .unwrap();
        assert!(matches!(req, JsonRpcMessage::Request(_)));

        let notif = JsonRpcMessage::from_value(
            serde_json::json!({"jsonrpc":"2.0","method":"progress"}),
            "",
        )
        .unwrap();
        assert!(matches!(notif, JsonRpcMessage::Notification(_)));

        let resp = JsonRpcMessage::from_value(
            serde_json::json!({"jsonrpc":"2.0","id":1,"result":{}}),
            "",
        )
        .unwrap();
        assert!(matches!(resp, JsonRpcMessage::Response(_)));
    }

    #[test]
    fn neither_id_nor_method_is_invalid_request() {
        let err = JsonRpcMessage::from_value(serde_json::json!({"jsonrpc":"2.0"}), "{}").unwrap_err();
        assert!(matches!(err, JsonRpcError::InvalidRequest { .. }));
        assert_eq!(err.code(), INVALID_REQUEST_CODE);
    }

    #[test]
    fn id_without_method_or_result_or_error_is_invalid_request_not_a_response() {
        let err = JsonRpcMessage::from_value(serde_json::json!({"jsonrpc":"2.0","id":1}), "{}").unwrap_err();
        assert!(matches!(err, JsonRpcError::InvalidRequest { .. }));
        assert_eq!(err.code(), INVALID_REQUEST_CODE);
    }

    #[test]
    fn missing_or_wrong_jsonrpc_field_is_invalid_request() {
        let missing = JsonRpcMessage::from_value(serde_json::json!({"id":1,"method":"ping"}), "{}").unwrap_err();
        assert!(matches!(missing, JsonRpcError::InvalidRequest { .. }));

        let wrong =
            JsonRpcMessage::from_value(serde_json::json!({"jsonrpc":"1.0","id":1,"method":"ping"}), "{}")
                .unwrap_err();
        assert!(matches!(wrong, JsonRpcError::InvalidRequest { .. }));
    }

    #[test]
    fn error_response_round_trips_to_a_line() {
        let msg = JsonRpcMessage::error_response(RequestId::Number(7), PARSE_ERROR_CODE, "bad json");
        let line = msg.to_line().unwrap();
        assert!(line.contains("\"code\":-32700"));
        assert!(line.contains("\"id\":7"));
    }
}
