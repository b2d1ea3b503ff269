//! `mcpadre` binary: the thin CLI shim around `mcpadre_core`'s runner and
//! installer (§6.3). Argument parsing, config-file discovery/parsing, and
//! error-to-exit-code classification live here; everything else is a direct
//! call into the core crate.
//!
//! Subcommand dispatch and the `Err(err) => { eprintln!("{err}"); 1 }` exit
//! pattern are grounded in `crates/xtask/src/main.rs`'s `clap::Subcommand`
//! shape.

mod cli_config;
mod errors;

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use mcpadre_core::backend::container::ContainerBackend;
use mcpadre_core::backend::http::HttpBackend;
use mcpadre_core::backend::node::NodeBackend;
use mcpadre_core::backend::python::PythonBackend;
use mcpadre_core::backend::shell::ShellBackend;
use mcpadre_core::config::ServerRecord;
use mcpadre_core::interceptor::TrafficLogger;
use mcpadre_core::{
    resolve_env_map, sandbox, Backend, Context, ContainerLockManager, Installer, Pipeline, ServerDirectory,
    SessionExit, SessionManager, Workspace,
};

use errors::CliError;

/// Disables any interactive prompt this CLI would otherwise show. This
/// runner's `install`/`run` paths have no prompts of their own yet, so the
/// flag is accepted for interface completeness (§6.3) but does not
/// currently change behavior.
const MCPADRE_NON_INTERACTIVE_ENV: &str = "MCPADRE_NON_INTERACTIVE";

#[derive(Debug, Parser)]
#[command(name = "mcpadre")]
#[command(about = "Local supervisor and proxy for Model Context Protocol servers")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Use the user workspace (`$HOME/.mcpadre`, or `MCPADRE_USER_DIR`) instead of a project one.
    #[arg(long, global = true)]
    user: bool,

    /// Treat this directory as the project workspace instead of discovering one from the cwd.
    #[arg(long, value_name = "PATH", global = true)]
    dir: Option<PathBuf>,

    /// Only look in the starting directory for a project config; don't walk upward.
    #[arg(long, global = true)]
    no_parent: bool,

    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: String,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch a configured server and proxy JSON-RPC traffic between stdio and it.
    Run {
        /// Name of the server entry in `mcpServers` to run.
        name: String,
    },
    /// Materialize on-disk install state for every server in the workspace.
    Install {
        /// Upgrade a materialized install even if the workspace doesn't otherwise allow it.
        #[arg(long)]
        force: bool,
        /// Accepted for interface completeness; `.gitignore` maintenance is out of scope here.
        #[arg(long)]
        skip_gitignore: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let debug_logging = cli.log_level.eq_ignore_ascii_case("debug") || cli.log_level.eq_ignore_ascii_case("trace");
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(target: "mcpadre::cli", kind = ?err.kind(), %err, "command failed");
            eprintln!("mcpadre: {err}");
            // §7: the source chain is noise for the common case; only
            // `--log-level debug`/`trace` gets it.
            if debug_logging {
                let mut source = std::error::Error::source(&err);
                while let Some(cause) = source {
                    eprintln!("  caused by: {cause}");
                    source = cause.source();
                }
            }
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    match &cli.command {
        Command::Run { name } => run_server(&cli, name).await,
        Command::Install { force, skip_gitignore } => run_install(&cli, *force, *skip_gitignore).await,
    }
}

/// Resolve the workspace this invocation is bound to and load its config,
/// per the `--user`/`--dir`/`--no-parent` flags (§6.3).
fn resolve_workspace(cli: &Cli) -> Result<(Context, mcpadre_core::config::WorkspaceConfig), CliError> {
    let parent_env: std::collections::HashMap<String, String> = std::env::vars().collect();

    if cli.user {
        let workspace = Workspace::user(&parent_env)?;
        workspace.ensure_dirs()?;
        let config_path = cli_config::find_project_config(workspace.root(), false).ok_or_else(|| {
            CliError::ConfigNotFound {
                start: workspace.root().to_path_buf(),
            }
        })?;
        let config = cli_config::load_config_file(&config_path)?;
        return Ok((Context::new(workspace, parent_env), config));
    }

    let start = match &cli.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(CliError::Cwd)?,
    };
    let config_path = cli_config::find_project_config(&start, !cli.no_parent)
        .ok_or_else(|| CliError::ConfigNotFound { start: start.clone() })?;
    let project_root = config_path.parent().unwrap_or(&start).to_path_buf();

    let workspace = Workspace::project(project_root);
    workspace.ensure_dirs()?;
    let config = cli_config::load_config_file(&config_path)?;
    Ok((Context::new(workspace, parent_env), config))
}

async fn run_server(cli: &Cli, name: &str) -> Result<i32, CliError> {
    let _ = std::env::var(MCPADRE_NON_INTERACTIVE_ENV);

    let (ctx, config) = resolve_workspace(cli)?;
    let record = config.mcp_servers.get(name).ok_or_else(|| CliError::UnknownServer(name.to_string()))?;

    let server_dir = ServerDirectory::new(ctx.workspace().server_dir(name));
    server_dir.materialize()?;

    // Runner-owned infra logs (§4.9): stderr when it's a TTY (interactive
    // invocation), otherwise a rotating file under this server's directory
    // so a host piping stdio doesn't see log lines interleaved with it.
    let _guard = mcpadre_core::logging::init(&server_dir.infra_log_dir(), name, &cli.log_level)?;

    let vars = ctx.variables();
    let workspace_root = ctx.workspace().root();

    let policy = sandbox::resolve(
        &record.common().sandbox,
        &config.options.extra_allow_read,
        &config.options.extra_allow_write,
        config.options.disable_all_sandboxes,
        false,
        &vars,
        workspace_root,
    )?;

    // §7: sandboxing only needs a working platform primitive when it is
    // actually enabled; a disabled sandbox on an unsupported host is not an
    // error. Containers/HTTP never go through this enforcement path at all.
    if policy.enabled && matches!(record, ServerRecord::Shell { .. } | ServerRecord::Python { .. } | ServerRecord::Node { .. }) {
        sandbox::validate()?;
    }

    let mut env = resolve_env_map(&config.env, &vars, workspace_root).await?;
    env.extend(resolve_env_map(&record.common().env, &vars, workspace_root).await?);

    // §4.9: one per-runner structured log path for this invocation, shared
    // between the traffic interceptor (req/res entries) and the backend's
    // stdio plumbing (stderr entries, §4.5.1) so both land in the same file.
    let server_log_path = server_dir.traffic_log_path(name);

    let backend: Box<dyn Backend> = match record {
        ServerRecord::Shell { shell, .. } => {
            Box::new(ShellBackend::spawn(shell, env, &policy, &ctx, Some(server_log_path.clone())).await?)
        }
        ServerRecord::Python { python, .. } => Box::new(
            PythonBackend::spawn(python, &server_dir, env, &policy, &vars, Some(server_log_path.clone())).await?,
        ),
        ServerRecord::Node { node, .. } => Box::new(
            NodeBackend::spawn(node, &server_dir, env, &policy, &vars, Some(server_log_path.clone())).await?,
        ),
        ServerRecord::Container { container, .. } => {
            let lock_manager = ContainerLockManager::new(server_dir.lock_path());
            Box::new(
                ContainerBackend::spawn(
                    name,
                    container,
                    server_dir.root(),
                    &lock_manager,
                    env,
                    &policy,
                    &vars,
                    workspace_root,
                    Some(server_log_path.clone()),
                )
                .await?,
            )
        }
        ServerRecord::Http { http, .. } => {
            let headers: BTreeMap<String, String> = resolve_env_map(&http.headers, &vars, workspace_root).await?;
            Box::new(HttpBackend::new(http.url.clone(), headers)?)
        }
    };

    let mut pipeline = Pipeline::new();
    let log_traffic = record.common().log_mcp_traffic.unwrap_or(config.options.log_mcp_traffic);
    if log_traffic {
        pipeline.push(Box::new(TrafficLogger::open(&server_log_path)?));
    }

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let mut session = SessionManager::new(stdin, stdout, backend, pipeline);

    match session.run().await? {
        SessionExit::Completed => Ok(0),
        // §7 Cancellation: silent exit, no message.
        SessionExit::Interrupted => Ok(1),
    }
}

async fn run_install(cli: &Cli, force: bool, _skip_gitignore: bool) -> Result<i32, CliError> {
    let (ctx, config) = resolve_workspace(cli)?;
    let installer = Installer::new(ctx.workspace().root(), &config.options, force);

    let mut any_failed = false;
    for (name, record) in &config.mcp_servers {
        match installer.install_one(name, record).await {
            Ok(outcome) => {
                tracing::info!(target: "mcpadre::install", server = %name, action = ?outcome.action, "installed");
            }
            Err(source) => {
                any_failed = true;
                eprintln!(
                    "mcpadre: {}",
                    CliError::Install {
                        name: name.clone(),
                        source,
                    }
                );
            }
        }
    }

    Ok(if any_failed { 1 } else { 0 })
}
