//! Per-server directory layout (§4.9): `<workspace>/.mcpadre/servers/<name>`,
//! the root under which installed packages, traffic logs, and infra logs for
//! one server live.
//!
//! Grounded in `crates/codex/src/home.rs`'s `CodexHomeLayout` (a struct of
//! path accessors plus a `materialize` that creates just the directories a
//! caller asked for), generalized from one fixed set of well-known files
//! (`config.toml`, `auth.json`, ...) to mcpadre's per-server install root.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerDirError {
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Path accessors for one server's on-disk state, rooted at
/// `<workspace>/.mcpadre/servers/<name>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerDirectory {
    root: PathBuf,
}

impl ServerDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `crate::installer` materializes a Python venv or `node_modules`
    /// tree (the shape depends on the server's kind).
    pub fn install_dir(&self) -> PathBuf {
        self.root.join("install")
    }

    /// `pyproject`/`package.json`-style marker recording the installed
    /// version, consulted by the installer's version-change policy.
    pub fn install_marker_path(&self) -> PathBuf {
        self.root.join(".install-version")
    }

    /// Per-runner structured traffic log (§4.7's `TrafficLogger`, §4.9:
    /// `logs/<name>__<ISO8601>.jsonl`), one file per runner invocation so
    /// concurrent/rapid re-runs of the same server never interleave into a
    /// single file.
    pub fn traffic_log_path(&self, name: &str) -> PathBuf {
        let now = time::OffsetDateTime::now_utc();
        let stamp = now
            .format(&time::format_description::well_known::Iso8601::DEFAULT)
            .unwrap_or_else(|_| now.unix_timestamp().to_string())
            .replace(':', "-");
        self.root
            .join("logs")
            .join(format!("{name}__{stamp}_{}.jsonl", std::process::id()))
    }

    /// Directory the tracing subscriber's rolling file appender writes infra
    /// logs into when stderr is not a TTY (§4.9).
    pub fn infra_log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// This server's own trust-on-first-use container digest lock (§4.4,
    /// §4.9). Only meaningful for container-backed servers.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join("lock.json")
    }

    /// Create every directory this server needs before it can run.
    pub fn materialize(&self) -> Result<(), ServerDirError> {
        for path in [self.root.clone(), self.install_dir(), self.infra_log_dir()] {
            std::fs::create_dir_all(&path).map_err(|source| ServerDirError::CreateDir {
                path,
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_creates_install_and_log_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let server_dir = ServerDirectory::new(dir.path().join("servers").join("demo"));
        server_dir.materialize().unwrap();

        assert!(server_dir.install_dir().is_dir());
        assert!(server_dir.infra_log_dir().is_dir());
    }

    #[test]
    fn traffic_log_lives_under_logs_and_is_named_after_the_server() {
        let server_dir = ServerDirectory::new("/ws/.mcpadre/servers/demo");
        let path = server_dir.traffic_log_path("demo");
        assert!(path.starts_with("/ws/.mcpadre/servers/demo/logs"));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("demo__"));
        assert!(path.extension().unwrap() == "jsonl");
    }
}
