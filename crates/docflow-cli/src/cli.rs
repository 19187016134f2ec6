//! `docflow` command line.
//!
//! # Usage
//!
//! ```bash
//! # Via the daemon
//! docflow state                 # project state as JSON
//! docflow tree                  # epic/story/ticket tree
//! docflow history               # recent command runs
//! docflow run /next-story       # run a slash command, streaming its logs
//! docflow watch                 # re-render the tree on every change
//!
//! # Directly on a project root
//! docflow tree --local --root ~/work/app
//! docflow validate
//! docflow wait-init --timeout 120
//! ```
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `docflow_cli=warn`).

use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docflow_core::{CommandExecutionRecord, CommandStatus, ProjectState};
use docflow_protocol::Notification;
use docflowd::config::DaemonConfig;
use docflowd::state::ProjectStateManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::client::{watch, ClientConfig, DaemonClient};
use crate::tree::{build_tree, render};

/// docflow - epic/story/ticket workflow tracker
#[derive(Parser, Debug)]
#[command(name = "docflow", version, about)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/docflow/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon socket (overrides config and DOCFLOW_SOCKET)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Project root for local commands (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the project state as JSON
    State,
    /// Print the epic/story/ticket tree
    Tree {
        /// Read the documents directly instead of asking the daemon
        #[arg(long)]
        local: bool,
    },
    /// Print recent command runs
    History,
    /// Run a slash command and stream its output
    Run {
        /// Slash command, e.g. /next-story
        command: String,
        /// Arguments passed to the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Re-render the tree whenever the project changes
    Watch,
    /// Check that the required documents exist with real content
    Validate,
    /// Wait until the project is initialized, then validate it
    WaitInit {
        /// Give up after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docflow_cli=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point of the `docflow` binary.
pub fn run() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from(path)?,
        None => DaemonConfig::load()?,
    };
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(root) = args.root {
        config.project_root = root;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let code = runtime.block_on(dispatch(args.command, config))?;
    if code != 0 {
        process::exit(code);
    }
    Ok(())
}

/// Runs one subcommand and returns the process exit code.
async fn dispatch(command: Command, config: DaemonConfig) -> Result<i32> {
    let client_config = ClientConfig::with_socket(config.socket_path.clone());

    match command {
        Command::State => {
            let mut client = DaemonClient::connect(&client_config.socket_path).await?;
            let state = client.project_state().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(0)
        }
        Command::Tree { local } => {
            let state = if local {
                local_manager(&config).get_project_state().await
            } else {
                let mut client = DaemonClient::connect(&client_config.socket_path).await?;
                client.project_state().await?
            };
            print!("{}", render(&build_tree(&state)));
            Ok(0)
        }
        Command::History => {
            let mut client = DaemonClient::connect(&client_config.socket_path).await?;
            let records = client.command_history().await?;
            if records.is_empty() {
                println!("No commands run yet.");
            }
            for record in &records {
                println!("{}", history_line(record));
            }
            Ok(0)
        }
        Command::Run { command, args } => run_command(&client_config, &command, &args).await,
        Command::Watch => {
            watch_tree(&client_config).await;
            Ok(0)
        }
        Command::Validate => {
            let validation = local_manager(&config).validate_project_structure().await;
            print_validation(&validation);
            Ok(if validation.valid { 0 } else { 1 })
        }
        Command::WaitInit { timeout } => {
            let manager = local_manager(&config);
            let outcome = manager
                .wait_for_initialization_with_validation_and_progress(
                    Duration::from_secs(timeout),
                    |progress| {
                        eprintln!(
                            "{:>3}% {} (attempt {})",
                            progress.percent,
                            progress.phase.label(),
                            progress.attempt
                        );
                    },
                )
                .await;
            match &outcome.validation {
                Some(validation) => print_validation(validation),
                None => println!("Timed out waiting for initialization."),
            }
            Ok(if outcome.success { 0 } else { 1 })
        }
    }
}

fn local_manager(config: &DaemonConfig) -> ProjectStateManager {
    ProjectStateManager::new(config.resolved_root()).with_poll_interval(config.init.poll_interval())
}

async fn run_command(config: &ClientConfig, command: &str, args: &[String]) -> Result<i32> {
    let mut client = DaemonClient::connect(&config.socket_path).await?;

    let interrupt = CancellationToken::new();
    let on_signal = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let record = client
        .run_command(command, args, &interrupt, |entry| {
            println!("{}", entry.message);
        })
        .await?;

    let _ = std::io::stdout().flush();
    eprintln!("{}", history_line(&record));
    Ok(match record.status {
        CommandStatus::Completed => 0,
        _ => record.exit_code.filter(|c| *c != 0).unwrap_or(1),
    })
}

async fn watch_tree(config: &ClientConfig) {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut last: Option<ProjectState> = None;
    watch(
        config,
        &cancel,
        |notification| match notification {
            Notification::StateUpdate { state } => {
                if last.as_ref() != Some(state) {
                    println!("{}", render(&build_tree(state)));
                    last = Some(state.clone());
                }
            }
            Notification::CommandStatusUpdate { .. } => debug!("Command status changed"),
            Notification::LogEntryStream { entry, .. } => println!("  | {}", entry.message),
            Notification::InitProgressUpdate { progress, status, .. } => {
                println!("init: {progress}% {status}");
            }
            Notification::ThemeUpdate { theme } => debug!(%theme, "Theme changed"),
            Notification::Error { message, .. } => warn!(%message, "Daemon error"),
        },
        || eprintln!("Daemon disconnected, reconnecting..."),
    )
    .await;
}

fn history_line(record: &CommandExecutionRecord) -> String {
    let duration = record
        .duration_ms
        .map(|ms| format!(" {:.1}s", Duration::from_millis(ms).as_secs_f64()))
        .unwrap_or_default();
    let exit = record
        .exit_code
        .map(|c| format!(" exit={c}"))
        .unwrap_or_default();
    format!(
        "{} {:<9} {}{duration}{exit}",
        record.start_time.format("%Y-%m-%d %H:%M:%S"),
        record.status.label(),
        record.command
    )
}

fn print_validation(validation: &docflowd::state::StructureValidation) {
    if validation.valid {
        println!("Project structure is valid.");
        return;
    }
    for file in &validation.missing_files {
        println!("missing: {file}");
    }
    for file in &validation.invalid_files {
        println!("invalid: {file}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use clap::CommandFactory;
    use docflow_core::CommandId;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_collects_trailing_args() {
        let args = Args::parse_from(["docflow", "run", "/next-story", "--fast", "3"]);
        match args.command {
            Command::Run { command, args } => {
                assert_eq!(command, "/next-story");
                assert_eq!(args, vec!["--fast", "3"]);
            }
            other => panic!("Expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_init_default_timeout() {
        let args = Args::parse_from(["docflow", "wait-init"]);
        assert!(matches!(args.command, Command::WaitInit { timeout: 300 }));
    }

    #[test]
    fn test_global_root_flag() {
        let args = Args::parse_from(["docflow", "tree", "--local", "--root", "/tmp/app"]);
        assert_eq!(args.root, Some(PathBuf::from("/tmp/app")));
        assert!(matches!(args.command, Command::Tree { local: true }));
    }

    #[test]
    fn test_history_line_format() {
        let mut record = CommandExecutionRecord::new(CommandId::new("cmd-1"), "/status");
        record.start_time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        record.status = CommandStatus::Completed;
        record.duration_ms = Some(1500);
        record.exit_code = Some(0);
        assert_eq!(
            history_line(&record),
            "2024-05-01 12:30:00 completed /status 1.5s exit=0"
        );
    }
}
