//! Installer (core subset, §4.10): materializes each enabled server's
//! per-server directory so the runner can start it — writing language
//! manifests, regenerating lockfiles, and pulling/pinning container images.
//!
//! Grounded in `crates/codex/src/mcp/config.rs`'s `McpConfigManager`
//! read-modify-write pattern (`add_server`/`add_app_runtime`): load whatever
//! on-disk state exists, decide what changed, write back. Generalized here
//! from "one shared TOML config file" to "one directory per server, shape
//! depending on its kind," and composed with `crate::container_lock` for the
//! container variant's trust-on-first-use pull.

use std::path::Path;

use thiserror::Error;
use tokio::process::Command;

use crate::config::{ServerRecord, VolumeMount, WorkspaceOptions};
use crate::container_lock::{self, ContainerLockError, ContainerLockManager};
use crate::server_dir::{ServerDirError, ServerDirectory};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("server directory error: {0}")]
    ServerDir(#[from] ServerDirError),
    #[error("container lock error: {0}")]
    ContainerLock(#[from] ContainerLockError),
    #[error("failed to write `{path}`: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("package manager `{manager}` exited with status {status}: {stderr}")]
    PackageManagerFailed {
        manager: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("neither `{primary}` nor `{fallback}` is available on PATH")]
    NoPackageManager { primary: String, fallback: String },
}

/// What happened when installing one server, surfaced to the CLI layer for
/// its own reporting. §4.10's ecosystem-audit vulnerability counts are
/// logged directly at WARN from inside the installer (`warn_on_vulnerabilities`)
/// rather than threaded back through this struct, the same way a version
/// change this call chose not to apply is returned here for the CLI to
/// report, not re-logged a second time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub server_name: String,
    pub action: InstallAction,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum InstallAction {
    /// Shell/http servers have no on-disk state to materialize.
    NoOp,
    /// A node/python package directory was created or refreshed.
    Materialized { version: String },
    /// A version change was detected but upgrade was not authorized; the
    /// existing materialized version is kept.
    VersionChangeSkipped { installed: String, requested: String },
    /// A container image was pulled and its digest pinned.
    ContainerPulled { digest: String },
    /// A container's pinned digest was reused without pulling.
    ContainerReused { reason: &'static str },
}

/// Installs every enabled server in a workspace (§4.10). One instance is
/// constructed per `mcpadre install` invocation.
pub struct Installer<'a> {
    workspace_root: &'a Path,
    options: &'a WorkspaceOptions,
    force: bool,
}

impl<'a> Installer<'a> {
    pub fn new(workspace_root: &'a Path, options: &'a WorkspaceOptions, force: bool) -> Self {
        Self {
            workspace_root,
            options,
            force,
        }
    }

    fn server_dir(&self, name: &str) -> ServerDirectory {
        ServerDirectory::new(self.workspace_root.join(".mcpadre").join("servers").join(name))
    }

    /// Install one server record under `name`, returning what was done.
    pub async fn install_one(&self, name: &str, record: &ServerRecord) -> Result<InstallOutcome, InstallError> {
        let action = match record {
            ServerRecord::Shell { .. } | ServerRecord::Http { .. } => InstallAction::NoOp,
            ServerRecord::Python { python, common } => {
                let dir = self.server_dir(name);
                dir.materialize()?;
                self.install_python(&dir, &python.package, &python.version, common.install_may_upgrade)
                    .await?
            }
            ServerRecord::Node { node, common } => {
                let dir = self.server_dir(name);
                dir.materialize()?;
                self.install_node(&dir, &node.package, &node.version, common.install_may_upgrade)
                    .await?
            }
            ServerRecord::Container { container, .. } => {
                let dir = self.server_dir(name);
                dir.materialize()?;
                self.install_container(
                    &dir,
                    name,
                    &container.image,
                    &container.tag,
                    container.pull_when_digest_changes.unwrap_or(false),
                    &container.volumes,
                )
                .await?
            }
        };

        Ok(InstallOutcome {
            server_name: name.to_string(),
            action,
        })
    }

    /// Decide whether a materialized install may be upgraded in place, per
    /// §4.10's version-change policy: either the workspace allows implicit
    /// upgrades, or the caller passed `--force`.
    fn may_upgrade(&self, record_allows: Option<bool>) -> bool {
        self.force
            || record_allows.unwrap_or(self.options.install_implicitly_upgrades_changed_packages)
    }

    async fn install_python(
        &self,
        dir: &ServerDirectory,
        package: &str,
        version: &str,
        install_may_upgrade: Option<bool>,
    ) -> Result<InstallAction, InstallError> {
        let marker = dir.install_marker_path();
        if let Some(installed) = read_marker(&marker)? {
            if installed == version {
                return Ok(InstallAction::Materialized { version: installed });
            }
            if !self.may_upgrade(install_may_upgrade) {
                return Ok(InstallAction::VersionChangeSkipped {
                    installed,
                    requested: version.to_string(),
                });
            }
        }

        write_pyproject(dir, package, version)?;
        run_package_manager("uv", &["sync"], dir.root(), "pip").await?;
        write_marker(&marker, version)?;
        warn_on_vulnerabilities("pip-audit", &["--format", "json"], dir.root(), package).await;
        Ok(InstallAction::Materialized {
            version: version.to_string(),
        })
    }

    async fn install_node(
        &self,
        dir: &ServerDirectory,
        package: &str,
        version: &str,
        install_may_upgrade: Option<bool>,
    ) -> Result<InstallAction, InstallError> {
        let marker = dir.install_marker_path();
        if let Some(installed) = read_marker(&marker)? {
            if installed == version {
                return Ok(InstallAction::Materialized { version: installed });
            }
            if !self.may_upgrade(install_may_upgrade) {
                return Ok(InstallAction::VersionChangeSkipped {
                    installed,
                    requested: version.to_string(),
                });
            }
        }

        write_package_json(dir, package, version)?;
        let chosen = run_package_manager("pnpm", &["install"], dir.root(), "npm").await?;
        write_marker(&marker, version)?;
        warn_on_vulnerabilities(&chosen, &["audit", "--json"], dir.root(), package).await;
        Ok(InstallAction::Materialized {
            version: version.to_string(),
        })
    }

    async fn install_container(
        &self,
        dir: &ServerDirectory,
        name: &str,
        image: &str,
        tag: &str,
        pull_when_digest_changes: bool,
        volumes: &std::collections::BTreeMap<String, VolumeMount>,
    ) -> Result<InstallAction, InstallError> {
        let lock_manager = ContainerLockManager::new(dir.lock_path());
        let existing = lock_manager.get(name)?;
        let preflight = container_lock::decide(existing.as_ref(), image, tag, pull_when_digest_changes)?;

        let pull = |lock_manager: &ContainerLockManager| async move {
            let runtime_bin = container_lock::find_runtime()?;
            let digest = container_lock::pull_and_resolve_digest(&runtime_bin, image, tag).await?;
            lock_manager.record(
                name,
                crate::container_lock::ContainerLock {
                    image: image.to_string(),
                    tag: tag.to_string(),
                    digest: digest.clone(),
                    pull_when_digest_changes,
                },
            )?;
            create_default_volume_dirs(dir, volumes)?;
            Ok::<_, InstallError>(digest)
        };

        match preflight {
            container_lock::PreflightDecision::FirstUse => {
                let digest = pull(&lock_manager).await?;
                Ok(InstallAction::ContainerPulled { digest })
            }
            container_lock::PreflightDecision::PinnedByDigest => Ok(InstallAction::ContainerReused {
                reason: "pinned by digest",
            }),
            container_lock::PreflightDecision::NeedsRemoteCheck => {
                let locked = existing.expect("remote check implies an existing lock");
                let runtime_bin = container_lock::find_runtime()?;
                let remote_digest = container_lock::query_remote_digest(&runtime_bin, image, tag).await?;
                match container_lock::resolve_remote_check(&locked.digest, &remote_digest) {
                    container_lock::ShouldPull::UpToDate => Ok(InstallAction::ContainerReused {
                        reason: "remote digest unchanged",
                    }),
                    container_lock::ShouldPull::DigestChanged | container_lock::ShouldPull::FirstUse => {
                        let digest = pull(&lock_manager).await?;
                        Ok(InstallAction::ContainerPulled { digest })
                    }
                }
            }
        }
    }
}

/// Create `<server_dir>/vol-<key>` for every volume without an explicit
/// `hostPath` template (§4.5.4's default mount point; an explicit template
/// may point outside the server directory entirely, so it is never
/// pre-created here).
fn create_default_volume_dirs(
    dir: &ServerDirectory,
    volumes: &std::collections::BTreeMap<String, VolumeMount>,
) -> Result<(), InstallError> {
    for (key, mount) in volumes {
        if mount.host_path.is_some() {
            continue;
        }
        let path = dir.root().join(format!("vol-{key}"));
        std::fs::create_dir_all(&path).map_err(|source| InstallError::Write { path, source })?;
    }
    Ok(())
}

fn read_marker(path: &Path) -> Result<Option<String>, InstallError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(InstallError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_marker(path: &Path, version: &str) -> Result<(), InstallError> {
    std::fs::write(path, version).map_err(|source| InstallError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_pyproject(dir: &ServerDirectory, package: &str, version: &str) -> Result<(), InstallError> {
    let path = dir.root().join("pyproject.toml");
    let contents = format!(
        "[project]\nname = \"mcpadre-server\"\nversion = \"0.1.0\"\nrequires-python = \">=3.10\"\ndependencies = [\"{package}=={version}\"]\n"
    );
    std::fs::write(&path, contents).map_err(|source| InstallError::Write { path, source })
}

fn write_package_json(dir: &ServerDirectory, package: &str, version: &str) -> Result<(), InstallError> {
    let path = dir.root().join("package.json");
    let contents = serde_json::json!({
        "name": "mcpadre-server",
        "private": true,
        "dependencies": { package: version },
    });
    std::fs::write(&path, serde_json::to_string_pretty(&contents).unwrap()).map_err(|source| {
        InstallError::Write { path, source }
    })
}

/// Run `manager args...` in `cwd`; if `manager` is not on PATH, fall back to
/// `fallback` (§4.10: "fall back to the alternative package manager if the
/// preferred one fails"). Returns whichever manager actually ran, so a
/// caller that needs to invoke the same tool again (e.g. for an audit) knows
/// which binary resolved.
async fn run_package_manager(
    manager: &str,
    args: &[&str],
    cwd: &Path,
    fallback: &str,
) -> Result<String, InstallError> {
    let chosen = if which::which(manager).is_ok() {
        manager
    } else if which::which(fallback).is_ok() {
        fallback
    } else {
        return Err(InstallError::NoPackageManager {
            primary: manager.to_string(),
            fallback: fallback.to_string(),
        });
    };

    let output = Command::new(chosen)
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|source| InstallError::Write {
            path: cwd.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(InstallError::PackageManagerFailed {
            manager: chosen.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(chosen.to_string())
}

/// §4.10: "run the ecosystem's audit if available and surface vulnerability
/// counts at WARN." Best-effort and never fatal to the install: a missing
/// auditor binary, a non-JSON/unrecognized report shape, or a spawn failure
/// are all silently skipped rather than failing the install over tooling
/// that exists purely to warn.
async fn warn_on_vulnerabilities(tool: &str, args: &[&str], cwd: &Path, package: &str) {
    if which::which(tool).is_err() {
        return;
    }
    let Ok(output) = Command::new(tool).args(args).current_dir(cwd).output().await else {
        return;
    };
    // Auditors (`npm audit`, `pnpm audit`, `pip-audit`) exit non-zero when
    // vulnerabilities are found; the JSON report on stdout is still valid.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let Ok(report) = serde_json::from_str::<serde_json::Value>(&stdout) else {
        return;
    };
    if let Some(count) = count_vulnerabilities(&report) {
        if count > 0 {
            tracing::warn!(
                target: "mcpadre::install",
                tool,
                package,
                vulnerabilities = count,
                "ecosystem audit found vulnerabilities"
            );
        }
    }
}

/// Parses the vulnerability count out of the two JSON report shapes this
/// crate's auditors produce: `npm audit --json`/`pnpm audit --json`'s
/// `metadata.vulnerabilities` severity-keyed object, and `pip-audit --format
/// json`'s top-level array of `{dependency, vulns: [...]}` entries.
fn count_vulnerabilities(report: &serde_json::Value) -> Option<u64> {
    if let Some(by_severity) = report.pointer("/metadata/vulnerabilities").and_then(|v| v.as_object()) {
        return Some(by_severity.values().filter_map(|v| v.as_u64()).sum());
    }
    if let Some(entries) = report.as_array() {
        return Some(
            entries
                .iter()
                .filter_map(|entry| entry.get("vulns").and_then(|v| v.as_array()).map(|v| v.len() as u64))
                .sum(),
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerCommon, ServerRecord};

    fn options() -> WorkspaceOptions {
        WorkspaceOptions::default()
    }

    #[test]
    fn counts_vulnerabilities_from_an_npm_style_audit_report() {
        let report = serde_json::json!({
            "metadata": {"vulnerabilities": {"info": 0, "low": 1, "moderate": 2, "high": 0, "critical": 0}}
        });
        assert_eq!(count_vulnerabilities(&report), Some(3));
    }

    #[test]
    fn counts_vulnerabilities_from_a_pip_audit_style_report() {
        let report = serde_json::json!([
            {"name": "pkg-a", "vulns": [{"id": "CVE-1"}]},
            {"name": "pkg-b", "vulns": []},
        ]);
        assert_eq!(count_vulnerabilities(&report), Some(1));
    }

    #[test]
    fn unrecognized_report_shape_yields_no_count() {
        assert_eq!(count_vulnerabilities(&serde_json::json!("not a report")), None);
    }

    #[tokio::test]
    async fn shell_and_http_servers_need_no_materialization() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options();
        let installer = Installer::new(dir.path(), &opts, false);

        let record = ServerRecord::Shell {
            shell: crate::config::ShellServer {
                command: "cat".to_string(),
                cwd: None,
            },
            common: ServerCommon::default(),
        };
        let outcome = installer.install_one("s", &record).await.unwrap();
        assert_eq!(outcome.action, InstallAction::NoOp);
    }

    #[test]
    fn may_upgrade_honors_force_flag() {
        let dir_opts = WorkspaceOptions {
            install_implicitly_upgrades_changed_packages: false,
            ..Default::default()
        };
        let root = Path::new("/ws");
        let forced = Installer::new(root, &dir_opts, true);
        assert!(forced.may_upgrade(None));

        let not_forced = Installer::new(root, &dir_opts, false);
        assert!(!not_forced.may_upgrade(None));
    }

    #[test]
    fn may_upgrade_honors_per_server_override_over_the_workspace_default() {
        // Workspace default forbids implicit upgrades, but a server that
        // opts itself in via `installMayUpgrade: true` should still upgrade
        // without `--force`.
        let dir_opts = WorkspaceOptions {
            install_implicitly_upgrades_changed_packages: false,
            ..Default::default()
        };
        let root = Path::new("/ws");
        let installer = Installer::new(root, &dir_opts, false);
        assert!(installer.may_upgrade(Some(true)));

        // And the reverse: a workspace that allows implicit upgrades can
        // still be opted out per-server.
        let permissive_opts = WorkspaceOptions {
            install_implicitly_upgrades_changed_packages: true,
            ..Default::default()
        };
        let installer = Installer::new(root, &permissive_opts, false);
        assert!(!installer.may_upgrade(Some(false)));
    }

    #[tokio::test]
    async fn pinned_by_digest_install_needs_no_runtime_on_path() {
        // S4 (trust-on-first-use), the no-pull half: a lock already matching
        // the configured tag with `pullWhenDigestChanges=false` is reused
        // without ever resolving a `docker`/`podman` binary, so this holds
        // even on a machine with neither installed.
        let dir = tempfile::tempdir().unwrap();
        let opts = options();
        let installer = Installer::new(dir.path(), &opts, false);
        let server_dir = installer.server_dir("demo");
        server_dir.materialize().unwrap();

        let lock_manager = ContainerLockManager::new(server_dir.lock_path());
        lock_manager
            .record(
                "demo",
                crate::container_lock::ContainerLock {
                    image: "ghcr.io/example/demo".to_string(),
                    tag: "1.0.0".to_string(),
                    digest: "sha256:aaaa".to_string(),
                    pull_when_digest_changes: false,
                },
            )
            .unwrap();

        let action = installer
            .install_container(
                &server_dir,
                "demo",
                "ghcr.io/example/demo",
                "1.0.0",
                false,
                &std::collections::BTreeMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            action,
            InstallAction::ContainerReused {
                reason: "pinned by digest",
            }
        );
    }

    #[test]
    fn version_change_skip_preserves_both_versions() {
        let outcome = InstallAction::VersionChangeSkipped {
            installed: "1.0.0".to_string(),
            requested: "2.0.0".to_string(),
        };
        match outcome {
            InstallAction::VersionChangeSkipped { installed, requested } => {
                assert_eq!(installed, "1.0.0");
                assert_eq!(requested, "2.0.0");
            }
            _ => panic!("expected version change skip"),
        }
    }
}
