//! Core runner/installer for `mcpadre`: resolves a per-server sandboxed
//! environment, starts the correct backend, and proxies JSON-RPC 2.0 between
//! a host (stdio) and a backend (stdio/HTTP/container).
//!
//! This crate implements the runner and installer described by the mcpadre
//! design. CLI argument parsing, config file parsing, registry search, and
//! host-config injection are external collaborators and are not implemented
//! here; only the in-memory contracts they produce/consume live in
//! [`config`] and [`host`].

pub mod backend;
pub mod config;
pub mod container_lock;
pub mod context;
pub mod env_resolve;
pub mod host;
pub mod installer;
pub mod interceptor;
pub mod jsonrpc;
pub mod logging;
pub mod sandbox;
pub mod server_dir;
pub mod session;
pub mod template;

pub use backend::{Backend, BackendError, BackendKind};
pub use config::{EnvValue, SandboxOptions, ServerRecord, WorkspaceOptions};
pub use container_lock::{ContainerLock, ContainerLockError, ContainerLockManager};
pub use context::{Context, Workspace, WorkspaceKind};
pub use env_resolve::{resolve_env_map, EnvResolveError};
pub use host::HostKey;
pub use installer::{InstallError, Installer};
pub use interceptor::{Interceptor, InterceptorError, Pipeline};
pub use jsonrpc::{JsonRpcError, JsonRpcMessage, RequestId};
pub use sandbox::{FinalizedSandbox, SandboxError, SandboxPolicy};
pub use server_dir::{ServerDirError, ServerDirectory};
pub use session::{SessionError, SessionExit, SessionManager};
pub use template::{TemplateError, Variables};
