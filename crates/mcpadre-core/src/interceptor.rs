//! Interceptor pipeline (§4.7): an ordered chain of request/response
//! transforms sitting between a host and a backend server.
//!
//! Modeled after `wrapper_events::line_parser::LineParser` — a small,
//! synchronous, fallible per-message trait driven by an owning pipeline,
//! the same shape `LineIngestor` uses to drive a `LineParser` one line at a
//! time. Interceptors are pure message transforms; anything needing actual
//! I/O (the traffic logger) does it synchronously against an already-open
//! file handle rather than pulling in an async-trait dependency the source
//! stack does not use.

use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::jsonrpc::JsonRpcMessage;

#[derive(Debug, Error)]
pub enum InterceptorError {
    #[error("interceptor `{name}` failed on request: {reason}")]
    Request { name: String, reason: String },
    #[error("interceptor `{name}` failed on response: {reason}")]
    Response { name: String, reason: String },
}

/// What a pipeline stage decided to do with a message.
pub enum Decision {
    /// Pass the (possibly rewritten) message to the next stage.
    Continue(JsonRpcMessage),
    /// Stop the pipeline here and use this message as the final result
    /// instead of forwarding to the backend/host.
    ShortCircuit(JsonRpcMessage),
}

/// One stage of the request/response pipeline.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    /// Called for each message flowing host -> backend.
    fn on_request(&mut self, message: JsonRpcMessage) -> Result<Decision, InterceptorError> {
        Ok(Decision::Continue(message))
    }

    /// Called for each message flowing backend -> host.
    fn on_response(&mut self, message: JsonRpcMessage) -> Result<Decision, InterceptorError> {
        Ok(Decision::Continue(message))
    }
}

/// An ordered chain of interceptors. Each direction runs stages in order and
/// stops early on the first `ShortCircuit`.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Interceptor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn push(&mut self, stage: Box<dyn Interceptor>) {
        self.stages.push(stage);
    }

    pub fn run_request(&mut self, mut message: JsonRpcMessage) -> Result<Decision, InterceptorError> {
        for stage in &mut self.stages {
            match stage.on_request(message)? {
                Decision::Continue(next) => message = next,
                short @ Decision::ShortCircuit(_) => return Ok(short),
            }
        }
        Ok(Decision::Continue(message))
    }

    pub fn run_response(&mut self, mut message: JsonRpcMessage) -> Result<Decision, InterceptorError> {
        for stage in &mut self.stages {
            match stage.on_response(message)? {
                Decision::Continue(next) => message = next,
                short @ Decision::ShortCircuit(_) => return Ok(short),
            }
        }
        Ok(Decision::Continue(message))
    }
}

/// Built-in interceptor (§6.1 `logMcpTraffic`): appends every message it
/// sees, in both directions, as a JSONL line to a log file. Entry shape is
/// the exact §6.4 contract: `{ts, direction:"req"|"res", msg: <raw
/// JSON-RPC>}`, so a human or another tool tailing the file sees the wire
/// message verbatim under `msg` rather than a re-derived summary.
pub struct TrafficLogger {
    file: std::fs::File,
}

impl TrafficLogger {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    fn append(&mut self, direction: &str, message: &JsonRpcMessage) -> std::io::Result<()> {
        let msg: serde_json::Value = message
            .to_line()
            .ok()
            .and_then(|line| serde_json::from_str(&line).ok())
            .unwrap_or(serde_json::Value::Null);
        let entry = serde_json::json!({
            "ts": now_iso8601(),
            "direction": direction,
            "msg": msg,
        });
        writeln!(self.file, "{entry}")
    }
}

/// ISO-8601 timestamp with offset (§4.9: "Timestamps are ISO-8601 with
/// offset"). Falls back to a zero offset if the local offset cannot be
/// determined (e.g. in a multi-threaded process on platforms where
/// `time` refuses to trust the C library's `localtime`).
fn now_iso8601() -> String {
    let now = time::OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Iso8601::DEFAULT)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

impl Interceptor for TrafficLogger {
    fn name(&self) -> &str {
        "traffic-logger"
    }

    fn on_request(&mut self, message: JsonRpcMessage) -> Result<Decision, InterceptorError> {
        if let Err(err) = self.append("req", &message) {
            return Err(InterceptorError::Request {
                name: self.name().to_string(),
                reason: err.to_string(),
            });
        }
        Ok(Decision::Continue(message))
    }

    fn on_response(&mut self, message: JsonRpcMessage) -> Result<Decision, InterceptorError> {
        if let Err(err) = self.append("res", &message) {
            return Err(InterceptorError::Response {
                name: self.name().to_string(),
                reason: err.to_string(),
            });
        }
        Ok(Decision::Continue(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{JsonRpcRequest, RequestId};

    fn sample_request() -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(1),
            method: "tools/list".to_string(),
            params: None,
        })
    }

    struct Rejecting;
    impl Interceptor for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }
        fn on_request(&mut self, _message: JsonRpcMessage) -> Result<Decision, InterceptorError> {
            Ok(Decision::ShortCircuit(JsonRpcMessage::error_response(
                RequestId::Number(1),
                -32600,
                "rejected",
            )))
        }
    }

    #[test]
    fn short_circuit_stops_remaining_stages() {
        struct PanicsIfCalled;
        impl Interceptor for PanicsIfCalled {
            fn name(&self) -> &str {
                "panics"
            }
            fn on_request(&mut self, _message: JsonRpcMessage) -> Result<Decision, InterceptorError> {
                panic!("should not run after short-circuit");
            }
        }

        let mut pipeline = Pipeline::new();
        pipeline.push(Box::new(Rejecting));
        pipeline.push(Box::new(PanicsIfCalled));

        match pipeline.run_request(sample_request()).unwrap() {
            Decision::ShortCircuit(JsonRpcMessage::Response(resp)) => {
                assert_eq!(resp.error.unwrap().code, -32600);
            }
            _ => panic!("expected short circuit"),
        }
    }

    #[test]
    fn traffic_logger_appends_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.jsonl");
        let mut logger = TrafficLogger::open(&path).unwrap();
        logger.on_request(sample_request()).unwrap();
        logger.on_response(sample_request()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"direction\":\"req\""));
        assert!(contents.contains("\"direction\":\"res\""));
        assert!(contents.contains("\"ts\":"));
        assert!(contents.contains("\"msg\":"));
    }
}
