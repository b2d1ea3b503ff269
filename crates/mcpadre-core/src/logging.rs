//! Tracing setup (§4.9, §6.2): infrastructure logs go to stderr when stderr
//! is a TTY, otherwise to a per-invocation JSONL file under
//! `<workspace>/.mcpadre/logs` (host-invoked runs should not interleave log
//! lines with any protocol traffic a caller might be tailing on stderr).
//!
//! Grounded in `atomize-hq-substrate/crates/forwarder/src/logging.rs`'s
//! `init` (rolling-file JSON layer + optional ANSI stdout layer composed via
//! `tracing_subscriber::registry()`), with two changes: the two layers are
//! mutually exclusive here per §4.9's stderr-vs-file split (that source runs
//! both at once), and the file is opened once per invocation under a
//! collision-resistant name (`<name>_<ISO8601>_<pid>.log`) rather than a
//! calendar-day rotation, since §4.9 requires filenames that stay unique
//! across rapid repeated invocations of the same server, not just across
//! days. TTY detection uses `std::io::IsTerminal` instead of that source's
//! `atty` crate (already in this workspace's dependency graph transitively,
//! but not one of its direct deps).

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory `{path}`: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open log file `{path}`: {source}")]
    OpenFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Initialize the global tracing subscriber. `log_dir` is the infra-log
/// directory used when stderr is not a TTY (§4.9, e.g.
/// `<workspace>/.mcpadre/logs`); `name` identifies the server this
/// invocation is running, used as the log filename's prefix. The returned
/// guard, when present, must be kept alive for the duration of the process
/// so buffered file log lines flush. `None` means the stderr layer was
/// installed instead and there is nothing to flush on drop.
pub fn init(log_dir: &Path, name: &str, level: &str) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if std::io::stderr().is_terminal() {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_ansi(true)
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();

        return Ok(None);
    }

    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let file_path = invocation_log_path(log_dir, name);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&file_path)
        .map_err(|source| LoggingError::OpenFile { path: file_path, source })?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(Some(guard))
}

/// Builds `<log_dir>/<name>_<ISO8601>_<pid>.log`. The timestamp alone can
/// collide across two invocations started within the same second; the pid
/// suffix makes the name unique even then.
fn invocation_log_path(log_dir: &Path, name: &str) -> PathBuf {
    let now = time::OffsetDateTime::now_utc();
    let stamp = now
        .format(&time::format_description::well_known::Iso8601::DEFAULT)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
        .replace(':', "-");
    log_dir.join(format!("{name}_{stamp}_{}.log", std::process::id()))
}
