//! Backend abstraction (§4.5): the `Backend` trait every server transport
//! implements, plus the stdio child-process plumbing four of the five
//! transports share.
//!
//! `Backend` is an object-safe async trait (`dyn Backend`, since the session
//! manager holds a heterogeneous set of running servers at once) via
//! `async-trait`, the same crate `bobmatnyc-rustbot`'s `LlmAdapter` uses for
//! exactly this shape (`#[async_trait] impl LlmAdapter for OpenRouterAdapter`,
//! stored and dispatched as `dyn LlmAdapter`). The stdio reader/writer task
//! pair is grounded in `crates/codex/src/mcp/jsonrpc.rs`'s
//! `spawn_with_subcommand`/`writer_task`/`reader_task`, generalized from
//! Codex's app-specific notification decoding to forwarding raw
//! `JsonRpcMessage`s untouched (mcpadre proxies; it does not interpret MCP
//! application semantics).

pub mod container;
pub mod http;
pub mod node;
pub mod python;
pub mod shell;
mod stdio;

use async_trait::async_trait;
use thiserror::Error;

use crate::container_lock::ContainerLockError;
use crate::env_resolve::EnvResolveError;
use crate::jsonrpc::{JsonRpcError, JsonRpcMessage};
use crate::sandbox::SandboxError;
use crate::template::TemplateError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendKind {
    Shell,
    Python,
    Node,
    Container,
    Http,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("backend transport channel closed unexpectedly")]
    ChannelClosed,
    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend JSON-RPC framing error: {0}")]
    JsonRpc(#[from] JsonRpcError),
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("env resolution error: {0}")]
    EnvResolve(#[from] EnvResolveError),
    #[error("container lock error: {0}")]
    ContainerLock(#[from] ContainerLockError),
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("container runtime `{0}` not found on PATH")]
    ContainerRuntimeNotFound(String),
    #[error("server process exited before it could be used")]
    ProcessExited,
    #[error("`{tool}` not found on PATH; run install first")]
    PreflightToolMissing { tool: String },
    #[error("HTTP request to `{url}` failed with status {status}: {body_snippet}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        body_snippet: String,
    },
    #[error("HTTP response from `{url}` had an empty body for a request expecting one")]
    HttpEmptyBody { url: String },
}

/// A running connection to one MCP server, regardless of transport.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Forward one message from the host to this server.
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), BackendError>;

    /// Receive the next message this server sends, or `None` once the
    /// transport has closed cleanly.
    async fn recv(&mut self) -> Result<Option<JsonRpcMessage>, BackendError>;

    /// Tear the backend down. Idempotent: calling it twice is not an error.
    async fn stop(&mut self) -> Result<(), BackendError>;
}
