//! Sandbox policy resolver (§4.3): merges the layered `allowRead`/
//! `allowReadWrite`/`networking` settings into one [`SandboxPolicy`], then
//! lowers that policy onto whichever enforcement mechanism the host platform
//! supports ([`FinalizedSandbox`]).
//!
//! macOS enforcement is grounded in
//! `other_examples/fcc8e686_zyzhang1130-codex__codex-rs-core-src-exec.rs.rs`'s
//! `create_seatbelt_command` (a `sandbox-exec -p <profile>` wrapper). Linux
//! enforcement is grounded in
//! `atomize-hq-substrate/crates/world/src/landlock.rs` (Landlock path-beneath
//! allowlist rules applied in-process before exec), chosen over that repo's
//! heavier namespace/pivot-root isolation path because Landlock's allowlist
//! model maps directly onto `allowRead`/`allowReadWrite` without requiring
//! this crate to also own bind-mounting and mount-namespace teardown.

#[cfg(target_os = "linux")]
mod linux;
mod macos;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::SandboxOptions;
use crate::template::{self, Variables};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("template error in sandbox path: {0}")]
    Template(#[from] template::TemplateError),
    #[error("sandbox-exec not found on PATH; cannot enforce macOS sandbox")]
    SeatbeltNotFound,
    #[error("failed to apply Landlock policy: {reason}")]
    LandlockFailed { reason: String },
    #[error("sandbox requested but this platform has no enforcement mechanism")]
    UnsupportedPlatform,
}

/// A fully merged, path-resolved sandbox policy for one server invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SandboxPolicy {
    pub enabled: bool,
    pub networking: bool,
    pub allow_read: Vec<PathBuf>,
    pub allow_read_write: Vec<PathBuf>,
}

/// Merge order (§4.3): built-in defaults, then the server's own `sandbox`
/// block, then the workspace's `extraAllowRead`/`extraAllowWrite`, then
/// `disableAllSandboxes` as a final global override.
pub fn resolve(
    server: &SandboxOptions,
    extra_allow_read: &[String],
    extra_allow_write: &[String],
    disable_all_sandboxes: bool,
    omit_system_paths_default: bool,
    vars: &Variables,
    workspace_root: &Path,
) -> Result<SandboxPolicy, SandboxError> {
    if disable_all_sandboxes {
        return Ok(SandboxPolicy {
            enabled: false,
            networking: true,
            allow_read: Vec::new(),
            allow_read_write: Vec::new(),
        });
    }

    let enabled = server.enabled.unwrap_or(true);
    let networking = server.networking.unwrap_or(true);
    let omit_system_paths = server.omit_system_paths.unwrap_or(omit_system_paths_default);
    let omit_workspace_path = server.omit_workspace_path.unwrap_or(false);

    let mut allow_read = Vec::new();
    if !omit_system_paths {
        for p in default_system_read_paths() {
            allow_read.push(p);
        }
    }
    if !omit_workspace_path {
        allow_read.push(workspace_root.to_path_buf());
    }
    for raw in server.allow_read.iter().chain(extra_allow_read.iter()) {
        allow_read.push(template::resolve_path(raw, vars, workspace_root)?);
    }

    let mut allow_read_write = Vec::new();
    for raw in server
        .allow_read_write
        .iter()
        .chain(extra_allow_write.iter())
    {
        allow_read_write.push(template::resolve_path(raw, vars, workspace_root)?);
    }

    Ok(SandboxPolicy {
        enabled,
        networking,
        allow_read,
        allow_read_write,
    })
}

fn default_system_read_paths() -> Vec<PathBuf> {
    ["/usr", "/lib", "/lib64", "/bin", "/etc"]
        .into_iter()
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .collect()
}

/// A sandbox policy lowered onto a concrete platform mechanism, ready for a
/// backend to apply when it spawns the server process.
#[derive(Clone, Debug)]
pub enum FinalizedSandbox {
    /// Sandboxing disabled, or no enforcement mechanism exists for this
    /// platform/backend combination (§4.3 Non-goals: containers bring their
    /// own isolation and are never wrapped a second time).
    Passthrough,
    /// macOS: the original argv, rewritten to run under `sandbox-exec -p`.
    MacSeatbelt { wrapped_argv: Vec<String> },
    /// Linux: apply a Landlock ruleset to the child before exec.
    LinuxLandlock {
        read_paths: Vec<String>,
        write_paths: Vec<String>,
    },
}

/// Lower `policy` onto this platform's enforcement mechanism for a process
/// about to run `argv` in `cwd`.
pub fn finalize(
    policy: &SandboxPolicy,
    argv: &[String],
    cwd: &Path,
) -> Result<FinalizedSandbox, SandboxError> {
    if !policy.enabled {
        return Ok(FinalizedSandbox::Passthrough);
    }

    #[cfg(target_os = "macos")]
    {
        return macos::finalize(policy, argv, cwd);
    }

    #[cfg(target_os = "linux")]
    {
        let _ = cwd;
        return linux::finalize(policy, argv);
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = (argv, cwd);
        Ok(FinalizedSandbox::Passthrough)
    }
}

/// Apply a `FinalizedSandbox::LinuxLandlock` policy to the *current* process,
/// from a `pre_exec` hook between fork and exec. A no-op on non-Linux
/// targets (those never produce this variant, but backends match on it
/// unconditionally since `FinalizedSandbox` itself isn't platform-gated).
pub fn apply_linux_landlock_in_child(read_paths: &[String], write_paths: &[String]) -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        linux::apply_in_child(read_paths, write_paths)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (read_paths, write_paths);
        Ok(())
    }
}

/// Startup probe (§4.3): checks whether the platform's enforcement mechanism
/// is actually available, so a misconfigured host fails fast instead of
/// silently running unsandboxed.
pub fn validate() -> Result<(), SandboxError> {
    #[cfg(target_os = "macos")]
    {
        return macos::validate();
    }

    #[cfg(target_os = "linux")]
    {
        return linux::validate();
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars() -> Variables {
        Variables {
            dirs: HashMap::new(),
            parent_env: HashMap::new(),
        }
    }

    #[test]
    fn disable_all_sandboxes_overrides_everything() {
        let opts = SandboxOptions {
            enabled: Some(true),
            ..Default::default()
        };
        let policy = resolve(&opts, &[], &[], true, false, &vars(), Path::new("/ws")).unwrap();
        assert!(!policy.enabled);
        assert!(policy.networking);
    }

    #[test]
    fn workspace_root_included_unless_omitted() {
        let opts = SandboxOptions::default();
        let policy = resolve(&opts, &[], &[], false, true, &vars(), Path::new("/ws")).unwrap();
        assert!(policy.allow_read.contains(&PathBuf::from("/ws")));

        let opts_omit = SandboxOptions {
            omit_workspace_path: Some(true),
            ..Default::default()
        };
        let policy_omit =
            resolve(&opts_omit, &[], &[], false, true, &vars(), Path::new("/ws")).unwrap();
        assert!(!policy_omit.allow_read.contains(&PathBuf::from("/ws")));
    }

    #[test]
    fn extra_allow_read_from_workspace_is_merged_in() {
        let opts = SandboxOptions::default();
        let policy = resolve(
            &opts,
            &["/extra".to_string()],
            &[],
            false,
            true,
            &vars(),
            Path::new("/ws"),
        )
        .unwrap();
        assert!(policy.allow_read.contains(&PathBuf::from("/extra")));
    }
}
