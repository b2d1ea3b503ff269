//! Env resolver (§4.2): resolves declared env-var recipes into a plain
//! string map, used verbatim for process env (stdio backends) or as HTTP
//! header values (the http backend).
//!
//! The `{command: C}` recipe variant is grounded in
//! `crates/codex/src/process.rs`'s `spawn_with_retry` pattern (retry on
//! `ExecutableFileBusy`, the same transient-spawn-failure handling used here).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time;

use crate::config::{EnvValue, SpecialDir};
use crate::template::{self, Variables};

/// Bound on `{command: C}` recipe execution (§5).
pub const ENV_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EnvResolveError {
    #[error("template error resolving env value: {0}")]
    Template(#[from] template::TemplateError),
    #[error("failed to spawn env command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("env command `{command}` exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("env command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Resolve every entry in `map` into a plain `{name -> value}` map.
pub async fn resolve_env_map(
    map: &BTreeMap<String, EnvValue>,
    vars: &Variables,
    workspace_dir: &Path,
) -> Result<BTreeMap<String, String>, EnvResolveError> {
    let mut out = BTreeMap::new();
    for (name, recipe) in map {
        let value = resolve_one(recipe, vars, workspace_dir).await?;
        out.insert(name.clone(), value);
    }
    Ok(out)
}

async fn resolve_one(
    recipe: &EnvValue,
    vars: &Variables,
    workspace_dir: &Path,
) -> Result<String, EnvResolveError> {
    match recipe {
        EnvValue::Literal(template_str) | EnvValue::StringTemplate { string: template_str } => {
            Ok(template::resolve(template_str, vars)?)
        }
        EnvValue::Pass { pass } => Ok(vars.parent_env.get(pass).cloned().unwrap_or_default()),
        EnvValue::Special { special } => Ok(special_dir_value(*special, vars)),
        EnvValue::Command { command } => run_command(command, workspace_dir).await,
    }
}

fn special_dir_value(special: SpecialDir, vars: &Variables) -> String {
    let key = match special {
        SpecialDir::Home => "home",
        SpecialDir::Config => "config",
        SpecialDir::Cache => "cache",
        SpecialDir::Data => "data",
        SpecialDir::Log => "log",
        SpecialDir::Temp => "temp",
        SpecialDir::Workspace => "workspace",
    };
    vars.dirs
        .get(key)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn run_command(command: &str, workspace_dir: &Path) -> Result<String, EnvResolveError> {
    let mut cmd = shell_command(command);
    cmd.current_dir(workspace_dir);
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut backoff = Duration::from_millis(2);
    let child = loop {
        match cmd.spawn() {
            Ok(child) => break child,
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy {
                    time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(EnvResolveError::Spawn {
                    command: command.to_string(),
                    source,
                });
            }
        }
    };

    let output = time::timeout(ENV_COMMAND_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| EnvResolveError::Timeout {
            command: command.to_string(),
            timeout: ENV_COMMAND_TIMEOUT,
        })?
        .map_err(|source| EnvResolveError::Spawn {
            command: command.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(EnvResolveError::NonZeroExit {
            command: command.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.trim_end_matches('\n').to_string())
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Variables {
        Variables {
            dirs: [("workspace".to_string(), std::path::PathBuf::from("/ws"))]
                .into_iter()
                .collect(),
            parent_env: [("FOO".to_string(), "bar".to_string())]
                .into_iter()
                .collect(),
        }
    }

    #[tokio::test]
    async fn pass_recipe_with_missing_var_yields_empty_string_not_error() {
        let map = [(
            "OUT".to_string(),
            EnvValue::Pass {
                pass: "MISSING".to_string(),
            },
        )]
        .into_iter()
        .collect();
        let resolved = resolve_env_map(&map, &vars(), Path::new("/ws")).await.unwrap();
        assert_eq!(resolved.get("OUT"), Some(&String::new()));
    }

    #[tokio::test]
    async fn pass_recipe_with_present_var_copies_it() {
        let map = [(
            "OUT".to_string(),
            EnvValue::Pass {
                pass: "FOO".to_string(),
            },
        )]
        .into_iter()
        .collect();
        let resolved = resolve_env_map(&map, &vars(), Path::new("/ws")).await.unwrap();
        assert_eq!(resolved.get("OUT"), Some(&"bar".to_string()));
    }

    #[tokio::test]
    async fn command_recipe_captures_trimmed_stdout() {
        let map = [(
            "OUT".to_string(),
            EnvValue::Command {
                command: "printf hello".to_string(),
            },
        )]
        .into_iter()
        .collect();
        let resolved = resolve_env_map(&map, &vars(), Path::new("/tmp")).await.unwrap();
        assert_eq!(resolved.get("OUT"), Some(&"hello".to_string()));
    }

    #[tokio::test]
    async fn command_recipe_with_non_zero_exit_is_an_error() {
        let map = [(
            "OUT".to_string(),
            EnvValue::Command {
                command: "exit 3".to_string(),
            },
        )]
        .into_iter()
        .collect();
        let err = resolve_env_map(&map, &vars(), Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvResolveError::NonZeroExit { .. }));
    }

    #[tokio::test]
    async fn string_template_recipe_substitutes_dirs() {
        let map = [(
            "OUT".to_string(),
            EnvValue::StringTemplate {
                string: "{{dirs.workspace}}/sub".to_string(),
            },
        )]
        .into_iter()
        .collect();
        let resolved = resolve_env_map(&map, &vars(), Path::new("/ws")).await.unwrap();
        assert_eq!(resolved.get("OUT"), Some(&"/ws/sub".to_string()));
    }
}
