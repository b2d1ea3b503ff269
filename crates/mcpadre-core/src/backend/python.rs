//! Python backend (§4.5.2, §4.10): delegates to the shell client's own
//! spawn-a-process mechanics, launching the declared package/version
//! entrypoint through `uv run` inside the per-server project
//! `crate::installer` materializes (a `pyproject.toml` pinning the package,
//! plus `uv`'s own lockfile, both written at `server_dir.root()`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::PythonServer;
use crate::jsonrpc::JsonRpcMessage;
use crate::sandbox::SandboxPolicy;
use crate::server_dir::ServerDirectory;
use crate::template::{self, Variables};

use super::stdio::StdioProcess;
use super::{Backend, BackendError, BackendKind};

const UV_BIN: &str = "uv";
const PYTHON_BIN: &str = "python";

pub struct PythonBackend {
    process: StdioProcess,
}

impl PythonBackend {
    /// `server_dir` names the per-server root `crate::installer` materializes
    /// a `pyproject.toml` + `uv` lockfile beneath (under
    /// [`ServerDirectory::install_dir`]).
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        server: &PythonServer,
        server_dir: &ServerDirectory,
        env: BTreeMap<String, String>,
        sandbox: &SandboxPolicy,
        vars: &Variables,
        server_log: Option<PathBuf>,
    ) -> Result<Self, BackendError> {
        preflight()?;

        let entrypoint = match &server.command {
            Some(explicit) => template::resolve(explicit, vars)?,
            None => server.package.clone(),
        };
        let argv = build_argv(server_dir, &entrypoint);

        let finalized = crate::sandbox::finalize(sandbox, &argv, server_dir.root())?;
        let process = StdioProcess::spawn(argv, server_dir.root(), env, finalized, server_log).await?;
        Ok(Self { process })
    }
}

/// §4.5.2: the actual child is `uv run --project <server_dir> <entrypoint>`,
/// never the entrypoint binary directly — `uv` resolves the venv itself,
/// the same way the node backend lets `npm exec` resolve a package's bin
/// rather than this crate guessing a path into `node_modules/.bin`.
/// `--project` points at `server_dir.root()`, where `crate::installer`
/// writes this server's `pyproject.toml`.
fn build_argv(server_dir: &ServerDirectory, entrypoint: &str) -> Vec<String> {
    let mut argv = vec![
        UV_BIN.to_string(),
        "run".to_string(),
        "--project".to_string(),
        server_dir.root().to_string_lossy().into_owned(),
    ];
    argv.extend(entrypoint.split_whitespace().map(str::to_string));
    argv
}

/// §4.5.2 preflight: verify `python` and `uv` are actually on `PATH` and
/// runnable before attempting to launch through them. Run this backend
/// never materialized its own toolchain; a missing one means `mcpadre
/// install` either never ran or failed for this server, not a transport
/// fault worth retrying.
fn preflight() -> Result<(), BackendError> {
    which::which(PYTHON_BIN).map_err(|_| BackendError::PreflightToolMissing {
        tool: PYTHON_BIN.to_string(),
    })?;
    which::which(UV_BIN).map_err(|_| BackendError::PreflightToolMissing {
        tool: UV_BIN.to_string(),
    })?;
    Ok(())
}

#[async_trait]
impl Backend for PythonBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Python
    }

    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), BackendError> {
        self.process.send(&message).await
    }

    async fn recv(&mut self) -> Result<Option<JsonRpcMessage>, BackendError> {
        self.process.recv().await
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        self.process.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_entrypoint_runs_the_package_name_under_uv_run() {
        let dir = ServerDirectory::new("/ws/.mcpadre/servers/demo");
        let argv = build_argv(&dir, "some-mcp-server");
        assert_eq!(argv[0], "uv");
        assert_eq!(argv[1], "run");
        assert_eq!(argv[2], "--project");
        assert!(argv[3].ends_with("/ws/.mcpadre/servers/demo"));
        assert_eq!(argv[4], "some-mcp-server");
    }

    #[test]
    fn explicit_command_template_is_split_into_argv_after_uv_run() {
        let dir = ServerDirectory::new("/ws/.mcpadre/servers/demo");
        let argv = build_argv(&dir, "some-mcp-server --stdio");
        assert_eq!(&argv[4..], ["some-mcp-server", "--stdio"]);
    }
}
