//! Container digest lock (§4.4): trust-on-first-use image pinning for
//! container-backed servers, stored at
//! `<workspace>/.mcpadre/servers/<name>/lock.json` (one file per server).
//!
//! The read-modify-write-whole-file shape is grounded in
//! `crates/codex/src/mcp/config.rs`'s `McpConfigManager` (`load_table`/
//! `write_table`), swapped from TOML to JSON since lock.json is this crate's
//! own format, not a shared editor config file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time;

#[derive(Debug, Error)]
pub enum ContainerLockError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize lock file: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("container runtime not found on PATH (looked for `docker`/`podman`)")]
    RuntimeNotFound,
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("`{command}` exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("pulled image `{image}:{tag}` reported no digest")]
    NoDigest { image: String, tag: String },
    #[error(
        "lock tag `{locked_tag}` does not match configured tag `{requested_tag}` for `{image}`; re-run install"
    )]
    TagMismatch {
        image: String,
        locked_tag: String,
        requested_tag: String,
    },
    #[error("pinned image `{image}@{digest}` is not present locally; re-run install to pull it")]
    PinnedImageMissingLocally { image: String, digest: String },
}

pub const PULL_TIMEOUT: Duration = Duration::from_secs(60);

/// A single server's pinned image state (§6.4): the exact on-disk shape of
/// `<workspace>/.mcpadre/servers/<name>/lock.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerLock {
    pub image: String,
    pub tag: String,
    pub digest: String,
    pub pull_when_digest_changes: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShouldPull {
    /// No lock entry exists yet for this server: pull and record whatever
    /// digest comes back (trust-on-first-use).
    FirstUse,
    /// A lock entry exists, matches the requested tag, `pullWhenDigestChanges`
    /// is set, and the remote digest no longer matches the locked one.
    DigestChanged,
    /// A lock entry exists and is current; reuse the pinned digest.
    UpToDate,
}

/// The offline part of §4.4's `shouldPull` decision: everything that does
/// not require a remote digest query. Case 4 (remote digest comparison) is
/// represented by [`NeedsRemoteCheck`](PreflightDecision::NeedsRemoteCheck)
/// and resolved separately by [`resolve_remote_check`], since it is the only
/// branch that needs network I/O.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PreflightDecision {
    FirstUse,
    PinnedByDigest,
    NeedsRemoteCheck,
}

/// Decide whether a server's container image needs pulling, given its
/// previously recorded lock (if any). Per §4.4:
/// 1. no lock => first use (pull).
/// 2. lock tag != requested tag => fatal [`ContainerLockError::TagMismatch`];
///    the runner must abort before accepting any stdio (Invariant 4, S3).
/// 3. `pullWhenDigestChanges=false` => pinned by digest, no pull.
/// 4. `pullWhenDigestChanges=true` => caller must query the remote digest;
///    see [`resolve_remote_check`].
pub fn decide(
    existing: Option<&ContainerLock>,
    image: &str,
    tag: &str,
    pull_when_digest_changes: bool,
) -> Result<PreflightDecision, ContainerLockError> {
    let Some(lock) = existing else {
        return Ok(PreflightDecision::FirstUse);
    };

    if lock.tag != tag {
        return Err(ContainerLockError::TagMismatch {
            image: image.to_string(),
            locked_tag: lock.tag.clone(),
            requested_tag: tag.to_string(),
        });
    }

    if !pull_when_digest_changes {
        return Ok(PreflightDecision::PinnedByDigest);
    }

    Ok(PreflightDecision::NeedsRemoteCheck)
}

/// Resolve case 4 of §4.4's decision: compare a freshly queried remote
/// digest against the locked one.
pub fn resolve_remote_check(locked_digest: &str, remote_digest: &str) -> ShouldPull {
    if locked_digest == remote_digest {
        ShouldPull::UpToDate
    } else {
        ShouldPull::DigestChanged
    }
}

/// Manages one server's `<workspace>/.mcpadre/servers/<name>/lock.json`
/// (§4.9, §6.4): a single [`ContainerLock`] record, not a multi-server map —
/// each container server owns its own lock file alongside its other
/// per-server state.
pub struct ContainerLockManager {
    path: PathBuf,
}

impl ContainerLockManager {
    /// `path` is this server's own `lock.json` (typically
    /// `<server_dir>/lock.json`), not a workspace-wide file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `server_name` is accepted for API symmetry with call sites that key
    /// backends by name, but this manager only ever has one record: its own.
    pub fn get(&self, _server_name: &str) -> Result<Option<ContainerLock>, ContainerLockError> {
        self.load()
    }

    pub fn record(&self, _server_name: &str, lock: ContainerLock) -> Result<(), ContainerLockError> {
        self.save(&lock)
    }

    fn load(&self) -> Result<Option<ContainerLock>, ContainerLockError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| ContainerLockError::Read {
            path: self.path.clone(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| ContainerLockError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, lock: &ContainerLock) -> Result<(), ContainerLockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ContainerLockError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized =
            serde_json::to_string_pretty(lock).map_err(|source| ContainerLockError::Serialize { source })?;
        fs::write(&self.path, serialized).map_err(|source| ContainerLockError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Pull `image:tag` with the given container runtime binary (`docker` or
/// `podman`) and return the resolved image digest, bounded at
/// [`PULL_TIMEOUT`].
pub async fn pull_and_resolve_digest(
    runtime_bin: &Path,
    image: &str,
    tag: &str,
) -> Result<String, ContainerLockError> {
    run_bounded(runtime_bin, &["pull", &format!("{image}:{tag}")]).await?;

    let inspect = run_bounded(
        runtime_bin,
        &["inspect", "--format", "{{.Id}}", &format!("{image}:{tag}")],
    )
    .await?;

    let digest = inspect.trim().to_string();
    if digest.is_empty() {
        return Err(ContainerLockError::NoDigest {
            image: image.to_string(),
            tag: tag.to_string(),
        });
    }
    Ok(digest)
}

async fn run_bounded(bin: &Path, args: &[&str]) -> Result<String, ContainerLockError> {
    let command_str = format!("{} {}", bin.display(), args.join(" "));
    let mut cmd = Command::new(bin);
    cmd.args(args);
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = cmd.spawn().map_err(|source| ContainerLockError::Spawn {
        command: command_str.clone(),
        source,
    })?;

    let output = time::timeout(PULL_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| ContainerLockError::Timeout {
            command: command_str.clone(),
            timeout: PULL_TIMEOUT,
        })?
        .map_err(|source| ContainerLockError::Spawn {
            command: command_str.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ContainerLockError::NonZeroExit {
            command: command_str,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Query the digest `image:tag` currently resolves to in the registry,
/// without pulling it locally (§4.4 case 4: `pullWhenDigestChanges=true`).
/// Bounded at [`PULL_TIMEOUT`] like a real pull.
pub async fn query_remote_digest(runtime_bin: &Path, image: &str, tag: &str) -> Result<String, ContainerLockError> {
    let output = run_bounded(
        runtime_bin,
        &["manifest", "inspect", "--verbose", &format!("{image}:{tag}")],
    )
    .await?;

    let parsed: serde_json::Value =
        serde_json::from_str(&output).map_err(|source| ContainerLockError::Parse {
            path: PathBuf::from(format!("{image}:{tag} manifest")),
            source,
        })?;

    let digest = parsed
        .get("Descriptor")
        .and_then(|d| d.get("digest"))
        .or_else(|| parsed.get("digest"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    digest.ok_or_else(|| ContainerLockError::NoDigest {
        image: image.to_string(),
        tag: tag.to_string(),
    })
}

/// §4.4 Invariant 4 / beyond the tag check: a pinned digest that no longer
/// exists in the local image store (manually pruned, `docker system prune`,
/// a fresh machine that never ran install) must abort the same as a tag
/// mismatch rather than let the runtime silently fall back to pulling by tag.
pub async fn verify_pinned_image_present_locally(
    runtime_bin: &Path,
    image: &str,
    digest: &str,
) -> Result<(), ContainerLockError> {
    let reference = format!("{image}@{digest}");
    match run_bounded(runtime_bin, &["image", "inspect", &reference]).await {
        Ok(_) => Ok(()),
        Err(ContainerLockError::NonZeroExit { .. }) => Err(ContainerLockError::PinnedImageMissingLocally {
            image: image.to_string(),
            digest: digest.to_string(),
        }),
        Err(other) => Err(other),
    }
}

/// Locate a container runtime binary on PATH, preferring `docker`.
pub fn find_runtime() -> Result<PathBuf, ContainerLockError> {
    which::which("docker")
        .or_else(|_| which::which("podman"))
        .map_err(|_| ContainerLockError::RuntimeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_existing_lock_is_first_use() {
        assert_eq!(decide(None, "img", "latest", false).unwrap(), PreflightDecision::FirstUse);
    }

    #[test]
    fn matching_lock_pinned_by_digest_when_pull_flag_unset() {
        let lock = ContainerLock {
            image: "img".to_string(),
            tag: "latest".to_string(),
            digest: "sha256:abc".to_string(),
            pull_when_digest_changes: false,
        };
        assert_eq!(
            decide(Some(&lock), "img", "latest", false).unwrap(),
            PreflightDecision::PinnedByDigest
        );
    }

    #[test]
    fn matching_lock_with_pull_flag_needs_remote_check() {
        let lock = ContainerLock {
            image: "img".to_string(),
            tag: "latest".to_string(),
            digest: "sha256:abc".to_string(),
            pull_when_digest_changes: false,
        };
        assert_eq!(
            decide(Some(&lock), "img", "latest", true).unwrap(),
            PreflightDecision::NeedsRemoteCheck
        );
    }

    #[test]
    fn tag_mismatch_is_a_fatal_error_regardless_of_pull_flag() {
        let lock = ContainerLock {
            image: "img".to_string(),
            tag: "1.0.0".to_string(),
            digest: "sha256:abc".to_string(),
            pull_when_digest_changes: false,
        };
        let err = decide(Some(&lock), "img", "2.0.0", false).unwrap_err();
        assert!(matches!(err, ContainerLockError::TagMismatch { .. }));
        let err = decide(Some(&lock), "img", "2.0.0", true).unwrap_err();
        assert!(matches!(err, ContainerLockError::TagMismatch { .. }));
    }

    #[test]
    fn remote_check_resolves_by_digest_equality() {
        assert_eq!(resolve_remote_check("sha256:aaa", "sha256:aaa"), ShouldPull::UpToDate);
        assert_eq!(
            resolve_remote_check("sha256:aaa", "sha256:bbb"),
            ShouldPull::DigestChanged
        );
    }

    #[tokio::test]
    async fn verify_pinned_image_present_locally_fails_fast_without_a_runtime_binary() {
        let bogus_runtime = PathBuf::from("/nonexistent/definitely-not-a-real-binary");
        let result = verify_pinned_image_present_locally(&bogus_runtime, "img", "sha256:abc").await;
        assert!(matches!(result, Err(ContainerLockError::Spawn { .. })));
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ContainerLockManager::new(dir.path().join("lock.json"));
        assert_eq!(manager.get("srv").unwrap(), None);

        manager
            .record(
                "srv",
                ContainerLock {
                    image: "img".to_string(),
                    tag: "latest".to_string(),
                    digest: "sha256:abc".to_string(),
                    pull_when_digest_changes: false,
                },
            )
            .unwrap();

        let loaded = manager.get("srv").unwrap().unwrap();
        assert_eq!(loaded.digest, "sha256:abc");
    }
}
