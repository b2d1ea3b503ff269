//! Session lifecycle (§4.8): owns one running backend plus the message
//! proxy loop between a host's stdio and that backend, with graceful
//! SIGINT/SIGTERM shutdown.
//!
//! Grounded in `crates/codex/src/mcp/app.rs`'s `AppRuntimePool`, generalized
//! from "a pool of named, reusable runtimes behind an `Arc<Mutex<HashMap>>`"
//! down to mcpadre's shape: a runner process supervises exactly one server
//! per session, so there is nothing to key by name or share across callers —
//! `SessionManager` keeps only the `stop`/idempotency discipline the source
//! pool applies per-entry.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::backend::{Backend, BackendError};
use crate::interceptor::{InterceptorError, Pipeline};
use crate::jsonrpc::stream::{MessageReader, MessageWriter};
use crate::jsonrpc::{JsonRpcError, JsonRpcMessage, RequestId};

/// Why [`SessionManager::run`] returned, so a caller can choose an exit code.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionExit {
    /// Host stdin hit EOF, or the backend's transport closed cleanly.
    Completed,
    /// A SIGINT/SIGTERM (or Ctrl-C on non-Unix) arrived mid-session.
    Interrupted,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("interceptor error: {0}")]
    Interceptor(#[from] InterceptorError),
    #[error("JSON-RPC framing error: {0}")]
    JsonRpc(#[from] JsonRpcError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns one running backend and proxies JSON-RPC messages between a host's
/// stdio and it, applying the interceptor pipeline in both directions.
pub struct SessionManager<H, W>
where
    H: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    host_reader: MessageReader<H>,
    host_writer: MessageWriter<W>,
    backend: Box<dyn Backend>,
    pipeline: Pipeline,
    stopped: bool,
}

impl<H, W> SessionManager<H, W>
where
    H: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(host_reader: H, host_writer: W, backend: Box<dyn Backend>, pipeline: Pipeline) -> Self {
        Self {
            host_reader: MessageReader::new(host_reader),
            host_writer: MessageWriter::new(host_writer),
            backend,
            pipeline,
            stopped: false,
        }
    }

    /// Run the proxy loop until the host stream closes, the backend exits,
    /// or a shutdown signal arrives. Always tears the backend down on the
    /// way out, even on error.
    ///
    /// The returned [`SessionExit`] distinguishes clean stream closure
    /// (stdin EOF or the backend exiting; §8 scenario S2, exit 0) from an
    /// interrupt signal (§7 Cancellation: silent exit 1) — both otherwise
    /// look identical from inside the select loop.
    pub async fn run(&mut self) -> Result<SessionExit, SessionError> {
        let result = self.run_inner().await;
        let _ = self.stop().await;
        result
    }

    async fn run_inner(&mut self) -> Result<SessionExit, SessionError> {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_signal() => {
                    return Ok(SessionExit::Interrupted);
                }

                host_message = self.host_reader.next_message() => {
                    match host_message? {
                        None => return Ok(SessionExit::Completed),
                        Some(Ok(message)) => self.handle_host_message(message).await?,
                        Some(Err(err)) => {
                            // A line that failed to parse carries no known id
                            // (§4.6, §8 scenario S6): respond with `id: null`
                            // and keep the session running.
                            let response = JsonRpcMessage::error_response_opt(None, err.code(), err.to_string());
                            self.host_writer.write_message(&response).await?;
                        }
                    }
                }

                backend_message = self.backend.recv() => {
                    match backend_message? {
                        None => return Ok(SessionExit::Completed),
                        Some(message) => self.handle_backend_message(message).await?,
                    }
                }
            }
        }
    }

    /// Dispatch one host message through the pipeline to the backend.
    ///
    /// Per §7, a failure resolving/sending a single request (pipeline error,
    /// backend transport error) is mapped to a JSON-RPC error response for
    /// that request and the session continues; only stdin EOF, a stream
    /// handler fault, or an explicit `stop()` are session-fatal. A
    /// notification has no id to respond to, so a failure on one is logged
    /// and otherwise swallowed.
    async fn handle_host_message(&mut self, message: JsonRpcMessage) -> Result<(), SessionError> {
        let id = message.id().cloned();

        let decision = match self.pipeline.run_request(message) {
            Ok(decision) => decision,
            Err(err) => return self.fail_request(id, err.to_string()).await,
        };

        match decision {
            crate::interceptor::Decision::Continue(message) => {
                if let Err(err) = self.backend.send(message).await {
                    return self.fail_request(id, err.to_string()).await;
                }
            }
            crate::interceptor::Decision::ShortCircuit(message) => {
                self.host_writer.write_message(&message).await?;
            }
        }
        Ok(())
    }

    async fn fail_request(&mut self, id: Option<RequestId>, reason: String) -> Result<(), SessionError> {
        tracing::warn!(target: "mcpadre::session", %reason, "request failed; continuing session");
        if let Some(id) = id {
            let response = JsonRpcMessage::error_response(id, crate::jsonrpc::INTERNAL_ERROR_CODE, reason);
            self.host_writer.write_message(&response).await?;
        }
        Ok(())
    }

    async fn handle_backend_message(&mut self, message: JsonRpcMessage) -> Result<(), SessionError> {
        match self.pipeline.run_response(message)? {
            crate::interceptor::Decision::Continue(message)
            | crate::interceptor::Decision::ShortCircuit(message) => {
                self.host_writer.write_message(&message).await?;
            }
        }
        Ok(())
    }

    /// Tear the backend down. Idempotent: calling it twice is not an error.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.backend.stop().await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{JsonRpcRequest, RequestId};
    use async_trait::async_trait;

    struct AlwaysFailsBackend;

    #[async_trait]
    impl Backend for AlwaysFailsBackend {
        fn kind(&self) -> crate::backend::BackendKind {
            crate::backend::BackendKind::Shell
        }

        async fn send(&mut self, _message: JsonRpcMessage) -> Result<(), BackendError> {
            Err(BackendError::ProcessExited)
        }

        async fn recv(&mut self) -> Result<Option<JsonRpcMessage>, BackendError> {
            std::future::pending().await
        }

        async fn stop(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn backend_send_failure_becomes_error_response_not_session_death() {
        let mut out = Vec::new();
        let mut session = SessionManager::new(
            tokio::io::empty(),
            &mut out,
            Box::new(AlwaysFailsBackend),
            Pipeline::new(),
        );

        let request = JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(1),
            method: "tools/list".to_string(),
            params: None,
        });
        session.handle_host_message(request).await.unwrap();

        let written = String::from_utf8(out).unwrap();
        assert!(written.contains("\"id\":1"));
        assert!(written.contains("-32603"));
    }
}
