//! macOS enforcement: wraps argv in `sandbox-exec -p <profile>`.
//!
//! Grounded directly in
//! `other_examples/fcc8e686_zyzhang1130-codex__codex-rs-core-src-exec.rs.rs`'s
//! `create_seatbelt_command`: a Seatbelt base policy plus per-invocation
//! `(allow file-read*)` / `(allow file-write* (subpath (param "...")))` /
//! network clauses, passed to `sandbox-exec` via `-D` path parameters.

use std::path::Path;

use super::{FinalizedSandbox, SandboxError, SandboxPolicy};

const SEATBELT_BASE_POLICY: &str = r#"(version 1)
(import "system.sb")
(deny default)
(allow mach*)
(allow process-fork)
(allow process-exec)
(allow sysctl-read)
(allow file-read-metadata)
"#;

const SEATBELT_EXECUTABLE: &str = "sandbox-exec";

pub(super) fn validate() -> Result<(), SandboxError> {
    which::which(SEATBELT_EXECUTABLE).map(|_| ()).map_err(|_| SandboxError::SeatbeltNotFound)
}

pub(super) fn finalize(
    policy: &SandboxPolicy,
    argv: &[String],
    _cwd: &Path,
) -> Result<FinalizedSandbox, SandboxError> {
    let sandbox_exec = which::which(SEATBELT_EXECUTABLE).map_err(|_| SandboxError::SeatbeltNotFound)?;
    Ok(FinalizedSandbox::MacSeatbelt {
        wrapped_argv: build_wrapped_argv(sandbox_exec.to_string_lossy().as_ref(), policy, argv),
    })
}

/// Pure policy-string/argv construction, split out of [`finalize`] so it is
/// unit-testable without requiring `sandbox-exec` to actually be on `PATH`.
fn build_wrapped_argv(sandbox_exec: &str, policy: &SandboxPolicy, argv: &[String]) -> Vec<String> {
    let file_read_policy = "(allow file-read* (literal \"/dev/null\"))";

    let (file_write_policy, write_args) = if policy.allow_read_write.is_empty() {
        (String::new(), Vec::new())
    } else {
        let mut params = Vec::new();
        let mut clauses = Vec::new();
        for (index, root) in policy.allow_read_write.iter().enumerate() {
            let name = format!("WRITABLE_ROOT_{index}");
            clauses.push(format!("(subpath (param \"{name}\"))"));
            params.push(format!("-D{name}={}", root.to_string_lossy()));
        }
        (
            format!("(allow file-write*\n{}\n)", clauses.join(" ")),
            params,
        )
    };

    let read_clauses: Vec<String> = policy
        .allow_read
        .iter()
        .chain(policy.allow_read_write.iter())
        .map(|p| format!("(subpath \"{}\")", p.to_string_lossy()))
        .collect();
    let read_policy = if read_clauses.is_empty() {
        String::new()
    } else {
        format!("(allow file-read*\n{}\n)", read_clauses.join(" "))
    };

    let network_policy = if policy.networking {
        "(allow network-outbound)\n(allow network-inbound)\n(allow system-socket)"
    } else {
        ""
    };

    let full_policy = format!(
        "{SEATBELT_BASE_POLICY}\n{file_read_policy}\n{read_policy}\n{file_write_policy}\n{network_policy}"
    );

    let mut wrapped_argv = vec![sandbox_exec.to_string(), "-p".to_string(), full_policy];
    wrapped_argv.extend(write_args);
    wrapped_argv.push("--".to_string());
    wrapped_argv.extend(argv.iter().cloned());
    wrapped_argv
}
