//! Newline-framed JSON-RPC stream handler (§4.6).
//!
//! Grounded in `crates/codex/src/mcp/jsonrpc.rs`'s `reader_task`/
//! `writer_task` (a `BufReader::lines()` loop feeding a decode step, and an
//! `mpsc`-fed writer appending `\n` and flushing after every message). The
//! source's reader silently `warn!`s and skips malformed lines; per this
//! crate's contract a line that fails to parse or fails the request/
//! notification/response shape check is never silently dropped — the caller
//! gets it back as an `Err` carrying the JSON-RPC error code to send back
//! upstream, and the stream keeps going on the next line.

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::{JsonRpcError, JsonRpcMessage};

/// Reads newline-delimited JSON-RPC messages from an async byte stream.
pub struct MessageReader<R> {
    lines: tokio::io::Lines<BufReader<R>>,
}

impl<R: tokio::io::AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }

    /// Read the next message. Blank lines are skipped (not an error, matching
    /// the source's `if line.trim().is_empty() { continue }`). A line that
    /// fails to parse as JSON or fails the request/notification/response
    /// shape check is returned as `Err` so the caller can emit a protocol
    /// error response and continue; `Ok(None)` means the stream ended.
    pub async fn next_message(&mut self) -> std::io::Result<Option<Result<JsonRpcMessage, JsonRpcError>>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }

            let decoded = match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(value) => JsonRpcMessage::from_value(value, &line),
                Err(source) => Err(JsonRpcError::Parse { line: line.clone(), source }),
            };
            return Ok(Some(decoded));
        }
    }
}

/// Writes newline-delimited JSON-RPC messages to an async byte stream,
/// flushing after each one (mirrors the source's `writer_task`).
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_message(&mut self, message: &JsonRpcMessage) -> Result<(), JsonRpcError> {
        let line = message.to_line()?;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }
}
