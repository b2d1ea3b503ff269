//! Container backend (§4.4, §4.5): runs a server image under `docker`/
//! `podman run`, with a trust-on-first-use digest pinned by
//! `crate::container_lock`.
//!
//! The argv-building shape (collect args onto one `Vec<String>`, merge the
//! caller's env on top of a cleared base) is grounded in
//! `crates/codex/src/mcp/runtime.rs`'s `StdioLauncher::command()`,
//! generalized from that method's `Command::env`/`Command::current_dir`
//! calls to `-v`/`-e` flags a container runtime understands, since the
//! actual child here is the container runtime binary, not the server itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::{ContainerServer, VolumeMount};
use crate::container_lock::{self, ContainerLock, ContainerLockManager, PreflightDecision, ShouldPull};
use crate::jsonrpc::JsonRpcMessage;
use crate::sandbox::SandboxPolicy;
use crate::template::{self, TemplateError, Variables};

use super::stdio::StdioProcess;
use super::{Backend, BackendError, BackendKind};

pub struct ContainerBackend {
    process: StdioProcess,
}

impl ContainerBackend {
    /// `lock_manager` owns this server's own `lock.json` (§4.9); `server_dir`
    /// is the directory bind-mounted volumes resolve relative paths against;
    /// `vars`/`workspace_root` template a volume's explicit `hostPath`, the
    /// same way every other path-shaped config field is templated (§4.1).
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        server_name: &str,
        server: &ContainerServer,
        server_dir: &Path,
        lock_manager: &ContainerLockManager,
        env: BTreeMap<String, String>,
        sandbox: &SandboxPolicy,
        vars: &Variables,
        workspace_root: &Path,
        server_log: Option<PathBuf>,
    ) -> Result<Self, BackendError> {
        let pull_when_digest_changes = server.pull_when_digest_changes.unwrap_or(false);

        // §4.4 Invariant 4 / S3: a lock whose tag no longer matches the
        // configured tag is fatal, surfaced before any stdio is accepted and
        // before a runtime binary is even required.
        let existing = lock_manager.get(server_name)?;
        let preflight = container_lock::decide(existing.as_ref(), &server.image, &server.tag, pull_when_digest_changes)?;

        // Every branch now touches a runtime binary at least to verify the
        // pinned image is actually present locally (beyond §4.4's tag check)
        // before accepting it without a pull.
        let digest = match preflight {
            PreflightDecision::PinnedByDigest => {
                let digest = existing.expect("pinned implies an existing lock").digest;
                let runtime_bin = container_lock::find_runtime()?;
                container_lock::verify_pinned_image_present_locally(&runtime_bin, &server.image, &digest).await?;
                digest
            }
            PreflightDecision::FirstUse => {
                let runtime_bin = container_lock::find_runtime()?;
                let digest =
                    container_lock::pull_and_resolve_digest(&runtime_bin, &server.image, &server.tag).await?;
                lock_manager.record(
                    server_name,
                    ContainerLock {
                        image: server.image.clone(),
                        tag: server.tag.clone(),
                        digest: digest.clone(),
                        pull_when_digest_changes,
                    },
                )?;
                digest
            }
            PreflightDecision::NeedsRemoteCheck => {
                let locked = existing.expect("remote check implies an existing lock");
                let runtime_bin = container_lock::find_runtime()?;
                let remote_digest =
                    container_lock::query_remote_digest(&runtime_bin, &server.image, &server.tag).await?;
                match container_lock::resolve_remote_check(&locked.digest, &remote_digest) {
                    ShouldPull::UpToDate => {
                        container_lock::verify_pinned_image_present_locally(
                            &runtime_bin,
                            &server.image,
                            &locked.digest,
                        )
                        .await?;
                        locked.digest
                    }
                    ShouldPull::DigestChanged | ShouldPull::FirstUse => {
                        let digest = container_lock::pull_and_resolve_digest(&runtime_bin, &server.image, &server.tag)
                            .await?;
                        lock_manager.record(
                            server_name,
                            ContainerLock {
                                image: server.image.clone(),
                                tag: server.tag.clone(),
                                digest: digest.clone(),
                                pull_when_digest_changes,
                            },
                        )?;
                        digest
                    }
                }
            }
        };

        // The runtime binary is also needed to actually launch the
        // container, regardless of which preflight branch ran.
        let runtime_bin = container_lock::find_runtime()?;
        let mut argv = vec![
            runtime_bin.to_string_lossy().into_owned(),
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
        ];
        if !sandbox.networking {
            argv.push("--network".to_string());
            argv.push("none".to_string());
        }
        for (key, _) in &env {
            argv.push("-e".to_string());
            argv.push(key.clone());
        }
        for (key, mount) in &server.volumes {
            argv.push("-v".to_string());
            argv.push(volume_flag(key, mount, server_dir, vars, workspace_root)?);
        }
        argv.push(format!("{}@{}", server.image, digest));
        if let Some(command) = &server.command {
            argv.extend(command.split_whitespace().map(str::to_string));
        }

        // The container runtime itself runs unsandboxed by this crate's
        // mechanisms (§4.3 Non-goals): it brings its own isolation.
        let finalized = crate::sandbox::FinalizedSandbox::Passthrough;
        let process = StdioProcess::spawn(argv, server_dir, env, finalized, server_log).await?;
        Ok(Self { process })
    }
}

/// `key` is this volume's name in the server record's `volumes` map, used
/// (per §4.5.4) as the default host path's `vol-<key>` suffix when no
/// explicit `hostPath` template is given.
fn volume_flag(
    key: &str,
    mount: &VolumeMount,
    server_dir: &Path,
    vars: &Variables,
    workspace_root: &Path,
) -> Result<String, TemplateError> {
    let host_path = match &mount.host_path {
        Some(explicit) => template::resolve_path(explicit, vars, workspace_root)?
            .to_string_lossy()
            .into_owned(),
        None => server_dir.join(format!("vol-{key}")).to_string_lossy().into_owned(),
    };
    Ok(if mount.read_only {
        format!("{host_path}:{}:ro", mount.container_path)
    } else {
        format!("{host_path}:{}", mount.container_path)
    })
}

#[async_trait]
impl Backend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
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
