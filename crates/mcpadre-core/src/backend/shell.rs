//! Shell backend (§4.5): runs a server's `command` under `/bin/sh -c`,
//! optionally wrapped by the platform sandbox.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::ShellServer;
use crate::context::Context;
use crate::jsonrpc::JsonRpcMessage;
use crate::sandbox::SandboxPolicy;

use super::stdio::StdioProcess;
use super::{Backend, BackendError, BackendKind};

pub struct ShellBackend {
    process: StdioProcess,
}

impl ShellBackend {
    pub async fn spawn(
        server: &ShellServer,
        env: BTreeMap<String, String>,
        sandbox: &SandboxPolicy,
        ctx: &Context,
        server_log: Option<PathBuf>,
    ) -> Result<Self, BackendError> {
        let cwd = match &server.cwd {
            Some(raw) => {
                crate::template::resolve_path(raw, &ctx.variables(), ctx.workspace().root())?
            }
            None => ctx.workspace().root().to_path_buf(),
        };

        let command = crate::template::resolve(&server.command, &ctx.variables())?;
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), command];
        let finalized = crate::sandbox::finalize(sandbox, &argv, &cwd)?;
        let process = StdioProcess::spawn(argv, &cwd, env, finalized, server_log).await?;
        Ok(Self { process })
    }
}

#[async_trait]
impl Backend for ShellBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Shell
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
