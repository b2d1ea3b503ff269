//! CLI-layer error classification (§7): maps every error this binary can
//! surface onto one of the taxonomy kinds, an exit code, and a message.
//!
//! Grounded in `crates/xtask/src/main.rs`'s `match cli.command { ... Err(err)
//! => { eprintln!("{err}"); 1 } }` dispatch, generalized from "always exit 1
//! on error" to a named `kind()` used for log targets and for deciding
//! whether `--log-level debug` should also print the source chain.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("could not determine the current directory: {0}")]
    Cwd(#[source] std::io::Error),
    #[error("no mcpadre.toml or mcpadre.json found starting from `{start}`")]
    ConfigNotFound { start: PathBuf },
    #[error("no server named `{0}` in this workspace's config")]
    UnknownServer(String),
    #[error("failed to read config file `{path}`: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{path}` as JSON: {source}")]
    ConfigParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse config file `{path}` as TOML: {source}")]
    ConfigParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("workspace error: {0}")]
    Workspace(#[from] mcpadre_core::context::WorkspaceError),
    #[error("server directory error: {0}")]
    ServerDir(#[from] mcpadre_core::ServerDirError),
    #[error("logging setup failed: {0}")]
    Logging(#[from] mcpadre_core::logging::LoggingError),
    #[error("sandbox error: {0}")]
    Sandbox(#[from] mcpadre_core::SandboxError),
    #[error("env resolution error: {0}")]
    EnvResolve(#[from] mcpadre_core::EnvResolveError),
    #[error("backend error: {0}")]
    Backend(#[from] mcpadre_core::BackendError),
    #[error("session error: {0}")]
    Session(#[from] mcpadre_core::SessionError),
    #[error("install error for server `{name}`: {source}")]
    Install {
        name: String,
        #[source]
        source: mcpadre_core::InstallError,
    },
}

/// The taxonomy kind from §7, used as the `tracing` target/field on the
/// final error log line.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    Configuration,
    Filesystem,
    Network,
    Installation,
    Sandbox,
    Transport,
    Protocol,
}

impl CliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CliError::ConfigNotFound { .. }
            | CliError::UnknownServer(_)
            | CliError::ConfigParseJson { .. }
            | CliError::ConfigParseToml { .. } => ErrorKind::Configuration,
            CliError::Cwd(_) | CliError::ConfigRead { .. } | CliError::ServerDir(_) | CliError::Workspace(_) => {
                ErrorKind::Filesystem
            }
            CliError::Logging(_) => ErrorKind::Filesystem,
            CliError::Sandbox(_) => ErrorKind::Sandbox,
            CliError::Install { .. } => ErrorKind::Installation,
            CliError::EnvResolve(_) => ErrorKind::Network,
            CliError::Backend(mcpadre_core::BackendError::Http(_))
            | CliError::Backend(mcpadre_core::BackendError::HttpStatus { .. })
            | CliError::Backend(mcpadre_core::BackendError::HttpEmptyBody { .. }) => ErrorKind::Network,
            CliError::Backend(mcpadre_core::BackendError::JsonRpc(_)) => ErrorKind::Transport,
            CliError::Backend(_) => ErrorKind::Protocol,
            CliError::Session(_) => ErrorKind::Protocol,
        }
    }

    /// Every CLI error currently exits 1; §7 and §6.3 only distinguish
    /// `install`'s 0-success/1-any-failure contract, not per-kind codes.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
