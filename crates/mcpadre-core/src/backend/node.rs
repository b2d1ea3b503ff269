//! Node backend (§4.5.3, §4.10): runs a package installed into a per-server
//! `node_modules` tree by `crate::installer`.
//!
//! Per §4.5.3, a server with an explicit `bin` runs as `node
//! ./node_modules/.bin/<bin>` (the console-script shim `npm`/`pnpm` install);
//! one without it runs as `npm exec <package> -- <args>`, letting npm itself
//! resolve the package's declared default bin rather than this crate
//! guessing an entrypoint name.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::NodeServer;
use crate::jsonrpc::JsonRpcMessage;
use crate::sandbox::SandboxPolicy;
use crate::server_dir::ServerDirectory;
use crate::template::{self, Variables};

use super::stdio::StdioProcess;
use super::{Backend, BackendError, BackendKind};

pub struct NodeBackend {
    process: StdioProcess,
}

impl NodeBackend {
    /// `server_dir` names the per-server root `crate::installer` materializes
    /// `node_modules` beneath (under [`ServerDirectory::install_dir`]).
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        server: &NodeServer,
        server_dir: &ServerDirectory,
        env: BTreeMap<String, String>,
        sandbox: &SandboxPolicy,
        vars: &Variables,
        server_log: Option<PathBuf>,
    ) -> Result<Self, BackendError> {
        let resolved_args = server.args.as_deref().map(|a| template::resolve(a, vars)).transpose()?;
        let argv = build_argv(server, server_dir, resolved_args.as_deref());
        let finalized = crate::sandbox::finalize(sandbox, &argv, server_dir.root())?;
        let process = StdioProcess::spawn(argv, server_dir.root(), env, finalized, server_log).await?;
        Ok(Self { process })
    }
}

/// §4.5.3's launch-command choice, split out as a pure function so both
/// branches are unit-testable without actually spawning `node`/`npm`.
/// `resolved_args` is `server.args` with its `{{dirs.*}}`/`{{parentEnv.*}}`
/// placeholders already resolved by the caller.
fn build_argv(server: &NodeServer, server_dir: &ServerDirectory, resolved_args: Option<&str>) -> Vec<String> {
    let mut argv = match &server.bin {
        Some(bin_name) => {
            let entrypoint = server_dir
                .install_dir()
                .join("node_modules")
                .join(".bin")
                .join(bin_name);
            vec!["node".to_string(), entrypoint.to_string_lossy().into_owned()]
        }
        None => vec![
            "npm".to_string(),
            "exec".to_string(),
            server.package.clone(),
            "--".to_string(),
        ],
    };
    if let Some(extra) = resolved_args {
        argv.extend(extra.split_whitespace().map(str::to_string));
    }
    argv
}

#[async_trait]
impl Backend for NodeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Node
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

    fn server(bin: Option<&str>, args: Option<&str>) -> NodeServer {
        NodeServer {
            package: "some-mcp-server".to_string(),
            version: "1.0.0".to_string(),
            node_version: None,
            bin: bin.map(str::to_string),
            args: args.map(str::to_string),
        }
    }

    #[test]
    fn explicit_bin_runs_under_node_from_the_dot_bin_shim() {
        let dir = ServerDirectory::new("/ws/.mcpadre/servers/demo");
        let argv = build_argv(&server(Some("some-server"), None), &dir, None);
        assert_eq!(argv[0], "node");
        assert!(argv[1].ends_with("node_modules/.bin/some-server"));
    }

    #[test]
    fn no_bin_falls_back_to_npm_exec_with_package_name() {
        let dir = ServerDirectory::new("/ws/.mcpadre/servers/demo");
        let argv = build_argv(&server(None, None), &dir, None);
        assert_eq!(argv, vec!["npm", "exec", "some-mcp-server", "--"]);
    }

    #[test]
    fn extra_args_are_appended_after_the_separator() {
        let dir = ServerDirectory::new("/ws/.mcpadre/servers/demo");
        let argv = build_argv(&server(None, Some("--verbose --port 8080")), &dir, Some("--verbose --port 8080"));
        assert_eq!(
            argv,
            vec!["npm", "exec", "some-mcp-server", "--", "--verbose", "--port", "8080"]
        );
    }
}
