//! HTTP backend (§4.5.5): posts each outgoing JSON-RPC message to a remote
//! MCP server's streamable-HTTP endpoint and queues whatever comes back.
//!
//! `reqwest::Client` usage (POST with headers, a JSON body, status check
//! before decoding) and the `"data: "` prefix strip are grounded in
//! `bobmatnyc-rustbot/src/llm/openrouter.rs`'s `send_request`/`stream_chat`,
//! generalized from OpenRouter's chat-completion chunks to raw JSON-RPC
//! messages; per §4.5.5 only the *last* parseable `data:` line in the body
//! is kept (OpenRouter's streaming loop instead forwards every chunk).

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::jsonrpc::JsonRpcMessage;

use super::{Backend, BackendError, BackendKind};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const SSE_DONE: &str = "[DONE]";

pub struct HttpBackend {
    client: Client,
    url: String,
    headers: BTreeMap<String, String>,
    pending: VecDeque<JsonRpcMessage>,
}

impl HttpBackend {
    pub fn new(url: String, headers: BTreeMap<String, String>) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url,
            headers,
            pending: VecDeque::new(),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), BackendError> {
        let is_notification = message.id().is_none();

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream");
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let body = message.to_line().map_err(BackendError::from)?;
        let response = request.body(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(BackendError::HttpStatus {
                url: self.url.clone(),
                status,
                body_snippet: snippet,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("text/event-stream") {
            let body = response.text().await?;
            self.pending.push_back(last_sse_json_message(&body, message.id().cloned()));
        } else {
            let body = response.text().await?;
            if body.trim().is_empty() {
                // §4.5.5: empty body + notification synthesizes `result:
                // null`; empty body + request is a transport error.
                if is_notification {
                    self.pending.push_back(JsonRpcMessage::Response(
                        crate::jsonrpc::JsonRpcResponse {
                            jsonrpc: "2.0".to_string(),
                            id: None,
                            result: Some(serde_json::Value::Null),
                            error: None,
                        },
                    ));
                } else {
                    return Err(BackendError::HttpEmptyBody {
                        url: self.url.clone(),
                    });
                }
            } else if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
                if let Ok(decoded) = JsonRpcMessage::from_value(value, &body) {
                    self.pending.push_back(decoded);
                }
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<JsonRpcMessage>, BackendError> {
        Ok(self.pending.pop_front())
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// §4.5.5: parse an SSE response body and take the *last* `data:` line that
/// parses as valid JSON-RPC; if none do, synthesize a protocol error with
/// the original request's id unknown to this layer (callers attach it).
fn last_sse_json_message(body: &str, request_id: Option<crate::jsonrpc::RequestId>) -> JsonRpcMessage {
    let mut last = None;
    for line in body.lines() {
        let data = match line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            Some(data) => data.trim(),
            None => continue,
        };
        if data.is_empty() || data == SSE_DONE {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
            if let Ok(decoded) = JsonRpcMessage::from_value(value, data) {
                last = Some(decoded);
            }
        }
    }

    last.unwrap_or_else(|| {
        JsonRpcMessage::error_response_opt(
            request_id,
            crate::jsonrpc::INTERNAL_ERROR_CODE,
            "no valid JSON in SSE",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::RequestId;

    #[test]
    fn last_sse_json_message_picks_final_parseable_data_line() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"a\":1}}\n\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"a\":2}}\n\n";
        let msg = last_sse_json_message(body, Some(RequestId::Number(1)));
        match msg {
            JsonRpcMessage::Response(resp) => {
                assert_eq!(resp.result.unwrap()["a"], 2);
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn last_sse_json_message_with_no_json_is_a_protocol_error() {
        let body = "data: not json at all\n\n";
        let msg = last_sse_json_message(body, Some(RequestId::Number(7)));
        match msg {
            JsonRpcMessage::Response(resp) => {
                let err = resp.error.unwrap();
                assert_eq!(err.code, crate::jsonrpc::INTERNAL_ERROR_CODE);
                assert_eq!(resp.id, Some(RequestId::Number(7)));
            }
            _ => panic!("expected response"),
        }
    }
}
