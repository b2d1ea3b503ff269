//! Shared stdio child-process transport used by the shell, python, node, and
//! container backends.
//!
//! Spawn-with-backoff, `kill_on_drop`, and the reader/writer task split are
//! grounded in `crates/codex/src/mcp/jsonrpc.rs`'s `spawn_with_subcommand`/
//! `writer_task`/`reader_task`; unlike that transport this one forwards raw
//! `JsonRpcMessage`s (mcpadre does not decode MCP application semantics) and
//! a parse failure is handed back to the caller as `Err` instead of logged
//! and dropped, so the session layer can emit a protocol-error response.
//!
//! §5/§9 additionally require killing a backend's entire process subtree, not
//! just its direct child (a `node`/`uv` launcher commonly forks its real
//! server as a grandchild). On Unix this crate makes the child its own
//! process-group leader (`nix::unistd::setsid` from a `pre_exec` hook, the
//! same hook shape the spawn-retry loop below already uses) and signals the
//! whole group with `nix::sys::signal::kill` against the negated pid, the
//! same primitive `kill(2)`/`killpg(2)` share.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::jsonrpc::stream::{MessageReader, MessageWriter};
use crate::jsonrpc::{JsonRpcError, JsonRpcMessage};
use crate::sandbox::FinalizedSandbox;

use super::BackendError;

/// §5: in-flight dispatches get a bounded grace window before the backend is
/// force-stopped.
const STOP_GRACE: Duration = Duration::from_secs(5);

pub(super) struct StdioProcess {
    child: Child,
    writer: MessageWriter<ChildStdin>,
    incoming: mpsc::UnboundedReceiver<Result<JsonRpcMessage, JsonRpcError>>,
    reader_task: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
}

impl StdioProcess {
    /// `server_log` is this server's own `logs/<name>__<ISO8601>.jsonl` file
    /// (§4.9); when present, child stderr is captured there as it arrives
    /// (§4.5.1), not only to the infra debug log.
    pub(super) async fn spawn(
        argv: Vec<String>,
        cwd: &Path,
        env: BTreeMap<String, String>,
        sandbox: FinalizedSandbox,
        server_log: Option<PathBuf>,
    ) -> Result<Self, BackendError> {
        let (program, args, landlock_paths) = match sandbox {
            FinalizedSandbox::Passthrough => (argv[0].clone(), argv[1..].to_vec(), None),
            FinalizedSandbox::MacSeatbelt { wrapped_argv } => {
                (wrapped_argv[0].clone(), wrapped_argv[1..].to_vec(), None)
            }
            FinalizedSandbox::LinuxLandlock { read_paths, write_paths } => {
                (argv[0].clone(), argv[1..].to_vec(), Some((read_paths, write_paths)))
            }
        };

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(cwd)
            .env_clear()
            .envs(&env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                command.pre_exec(move || {
                    // Process-group leader first, so a bounded group-wide
                    // signal on stop() reaches every descendant this child
                    // forks (§5, §9).
                    nix::unistd::setsid().map_err(std::io::Error::from)?;
                    if let Some((read_paths, write_paths)) = &landlock_paths {
                        crate::sandbox::apply_linux_landlock_in_child(read_paths, write_paths)?;
                    }
                    Ok(())
                });
            }
        }
        #[cfg(not(unix))]
        let _ = landlock_paths;

        let command_debug = format!("{program} {}", args.join(" "));
        let mut backoff = Duration::from_millis(2);
        let mut child = None;
        for attempt in 0..5 {
            match command.spawn() {
                Ok(spawned) => {
                    child = Some(spawned);
                    break;
                }
                Err(source) => {
                    let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                        || source.raw_os_error() == Some(26);
                    if is_busy && attempt < 4 {
                        tokio::time::sleep(backoff).await;
                        backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                        continue;
                    }
                    return Err(BackendError::Spawn {
                        command: command_debug,
                        source,
                    });
                }
            }
        }
        let mut child = child.expect("spawn loop returns or errors");

        let stdout = child.stdout.take().ok_or(BackendError::ProcessExited)?;
        let stdin = child.stdin.take().ok_or(BackendError::ProcessExited)?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(reader_loop(stdout, tx));
        let stderr_task = stderr.map(|stderr| tokio::spawn(stderr_loop(stderr, server_log)));

        Ok(Self {
            child,
            writer: MessageWriter::new(stdin),
            incoming: rx,
            reader_task,
            stderr_task,
        })
    }

    pub(super) async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), BackendError> {
        self.writer.write_message(message).await.map_err(BackendError::from)
    }

    pub(super) async fn recv(&mut self) -> Result<Option<JsonRpcMessage>, BackendError> {
        match self.incoming.recv().await {
            None => Ok(None),
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(err)) => Err(BackendError::from(err)),
        }
    }

    /// Tear the child (and its whole process group) down. §5: a bounded
    /// grace window for a clean exit (SIGTERM to the group), then an
    /// unconditional SIGKILL if it hasn't, so this never hangs.
    pub(super) async fn stop(&mut self) -> Result<(), BackendError> {
        self.reader_task.abort();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if self.child.try_wait()?.is_none() {
            signal_process_group(&self.child, TermSignal::Terminate);
            if tokio::time::timeout(STOP_GRACE, self.child.wait()).await.is_err() {
                signal_process_group(&self.child, TermSignal::Kill);
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum TermSignal {
    Terminate,
    Kill,
}

/// Signal this child's whole process group (§5, §9: "process-tree kill"),
/// set up on spawn via `setsid` in `pre_exec` so the child is its own group
/// leader and a group-wide signal cannot reach this runner process itself.
/// A no-op on non-Unix targets, where there is no equivalent primitive and
/// `Child::start_kill`/`kill_on_drop` are the only cleanup available.
#[cfg(unix)]
fn signal_process_group(child: &Child, signal: TermSignal) {
    let Some(pid) = child.id() else { return };
    let sig = match signal {
        TermSignal::Terminate => nix::sys::signal::Signal::SIGTERM,
        TermSignal::Kill => nix::sys::signal::Signal::SIGKILL,
    };
    // A negative pid targets the whole process group sharing that pgid,
    // the same kill(2)/killpg(2) convention `nix::sys::signal::kill` exposes
    // directly rather than via a separate `killpg` binding.
    let group = nix::unistd::Pid::from_raw(-(pid as i32));
    let _ = nix::sys::signal::kill(group, sig);
}

#[cfg(not(unix))]
fn signal_process_group(_child: &Child, _signal: TermSignal) {}

async fn reader_loop(
    stdout: tokio::process::ChildStdout,
    tx: mpsc::UnboundedSender<Result<JsonRpcMessage, JsonRpcError>>,
) {
    let mut reader = MessageReader::new(stdout);
    loop {
        match reader.next_message().await {
            Ok(None) => break,
            Ok(Some(decoded)) => {
                if tx.send(decoded).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

/// §4.5.1: "child stderr is captured to the server log". `server_log` is
/// this invocation's own `logs/<name>__<ISO8601>.jsonl` file, the same one
/// `TrafficLogger` appends request/response entries to (§4.7, §4.9); each
/// stderr line becomes its own JSONL entry there, tagged `"stderr"` instead
/// of `"req"`/`"res"` so a reader tailing the file sees both interleaved in
/// arrival order. The infra debug log still gets every line too, for a
/// tailing operator who only has that file open.
async fn stderr_loop(stderr: tokio::process::ChildStderr, server_log: Option<PathBuf>) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut log_file = server_log.as_deref().and_then(open_server_log);

    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "mcpadre::backend::stderr", "{line}");
        if let Some(file) = &mut log_file {
            append_stderr_entry(file, &line);
        }
    }
}

fn open_server_log(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path).ok()
}

fn append_stderr_entry(file: &mut std::fs::File, line: &str) {
    use std::io::Write;

    let now = time::OffsetDateTime::now_utc();
    let ts = now
        .format(&time::format_description::well_known::Iso8601::DEFAULT)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    let entry = serde_json::json!({"ts": ts, "direction": "stderr", "line": line});
    let _ = writeln!(file, "{entry}");
}

impl Drop for StdioProcess {
    fn drop(&mut self) {
        self.reader_task.abort();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        // Best-effort only: `drop` can't await a grace window, so this is a
        // last-resort backstop for a caller that skipped `stop()` entirely.
        // The ordinary path is `stop()` above, which gives the group a
        // chance to exit cleanly first.
        signal_process_group(&self.child, TermSignal::Kill);
        let _ = self.child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn child_stderr_is_captured_as_jsonl_entries_in_the_server_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("logs").join("demo__2026.jsonl");

        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo boom 1>&2".to_string(),
        ];
        let mut process = StdioProcess::spawn(
            argv,
            dir.path(),
            BTreeMap::new(),
            FinalizedSandbox::Passthrough,
            Some(log_path.clone()),
        )
        .await
        .unwrap();

        // Give the child a moment to exit and the stderr task a moment to
        // drain the pipe and append its entry before tearing down.
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        process.stop().await.unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("\"direction\":\"stderr\""));
        assert!(contents.contains("boom"));
    }
}

