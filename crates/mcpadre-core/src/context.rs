//! Workspace context: the root a runner process is bound to for its lifetime.
//!
//! Mirrors `crates/codex/src/home.rs`'s `CodexHomeLayout` (a directory-layout
//! description the runner materializes on demand) generalized from a single
//! `CODEX_HOME` root to mcpadre's project/user workspace split.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::template::Variables;

/// Env var that overrides the user workspace root (`$HOME/.mcpadre` by default).
pub const MCPADRE_USER_DIR_ENV: &str = "MCPADRE_USER_DIR";

/// Whether a workspace is rooted in a project directory or the user's home.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkspaceKind {
    Project,
    User,
}

/// Errors raised while resolving a workspace root.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("could not determine the user's home directory")]
    NoHomeDir,
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Either a project workspace (a directory containing `mcpadre.{yaml,json,toml}`)
/// or a user workspace (a home-anchored directory, default `$HOME/.mcpadre`).
///
/// A runner process is bound to exactly one workspace for its lifetime.
/// `workspace_dir/.mcpadre/servers/<name>/` is the authoritative root of
/// server state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Workspace {
    kind: WorkspaceKind,
    root: PathBuf,
}

impl Workspace {
    /// Build a project workspace rooted at `root` (the directory holding
    /// `mcpadre.{yaml,json,toml}`).
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self {
            kind: WorkspaceKind::Project,
            root: root.into(),
        }
    }

    /// Build a user workspace, honoring `MCPADRE_USER_DIR` if set, else
    /// `$HOME/.mcpadre`.
    pub fn user(parent_env: &std::collections::HashMap<String, String>) -> Result<Self, WorkspaceError> {
        if let Some(dir) = parent_env.get(MCPADRE_USER_DIR_ENV) {
            return Ok(Self {
                kind: WorkspaceKind::User,
                root: PathBuf::from(dir),
            });
        }

        let home = dirs::home_dir().ok_or(WorkspaceError::NoHomeDir)?;
        Ok(Self {
            kind: WorkspaceKind::User,
            root: home.join(".mcpadre"),
        })
    }

    pub fn kind(&self) -> WorkspaceKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<workspace>/.mcpadre`, the authoritative root of all mcpadre state.
    pub fn mcpadre_dir(&self) -> PathBuf {
        self.root.join(".mcpadre")
    }

    /// `<workspace>/.mcpadre/servers`
    pub fn servers_dir(&self) -> PathBuf {
        self.mcpadre_dir().join("servers")
    }

    /// `<workspace>/.mcpadre/servers/<name>`
    pub fn server_dir(&self, name: &str) -> PathBuf {
        self.servers_dir().join(name)
    }

    /// `<workspace>/.mcpadre/logs`, the infrastructure-log directory used
    /// when stderr is not a TTY.
    pub fn logs_dir(&self) -> PathBuf {
        self.mcpadre_dir().join("logs")
    }

    pub fn ensure_dirs(&self) -> Result<(), WorkspaceError> {
        for path in [self.mcpadre_dir(), self.servers_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&path).map_err(|source| WorkspaceError::CreateDir {
                path,
                source,
            })?;
        }
        Ok(())
    }
}

/// Explicit context threaded through every call in the runner and installer,
/// replacing the source's global-mutable singleton logger and global
/// workspace/user flags. No ambient state: every function that needs the
/// workspace, the parent environment, or directory variables takes a
/// `&Context` argument.
#[derive(Clone, Debug)]
pub struct Context {
    workspace: Workspace,
    parent_env: std::collections::HashMap<String, String>,
}

impl Context {
    pub fn new(workspace: Workspace, parent_env: std::collections::HashMap<String, String>) -> Self {
        Self {
            workspace,
            parent_env,
        }
    }

    /// Build a context from the real process environment (`std::env::vars`).
    /// Intended for the CLI shim; core code should otherwise only see the
    /// explicit env map threaded through `Context`.
    pub fn from_process_env(workspace: Workspace) -> Self {
        Self {
            workspace,
            parent_env: std::env::vars().collect(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn parent_env(&self) -> &std::collections::HashMap<String, String> {
        &self.parent_env
    }

    /// The `{dirs.*}` / `{parentEnv.*}` variable set used by the template
    /// resolver for this context.
    pub fn variables(&self) -> Variables {
        let root = self.workspace.root().to_path_buf();
        let special = |name: &str| -> PathBuf {
            match name {
                "home" => dirs::home_dir().unwrap_or_else(|| root.clone()),
                "config" => dirs::config_dir().unwrap_or_else(|| root.clone()),
                "cache" => dirs::cache_dir().unwrap_or_else(|| root.clone()),
                "data" => dirs::data_dir().unwrap_or_else(|| root.clone()),
                "log" => self.workspace.logs_dir(),
                "temp" => std::env::temp_dir(),
                "workspace" => root.clone(),
                _ => root.clone(),
            }
        };

        Variables {
            dirs: [
                ("home".to_string(), special("home")),
                ("config".to_string(), special("config")),
                ("cache".to_string(), special("cache")),
                ("data".to_string(), special("data")),
                ("log".to_string(), special("log")),
                ("temp".to_string(), special("temp")),
                ("workspace".to_string(), special("workspace")),
            ]
            .into_iter()
            .collect(),
            parent_env: self.parent_env.clone(),
        }
    }
}
