//! `docflowd` command line.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground) for the current directory
//! docflowd start
//!
//! # Start the daemon (background) for another project
//! docflowd start -d --root ~/work/app
//!
//! # Stop the daemon
//! docflowd stop
//!
//! # Check daemon status
//! docflowd status
//!
//! # Custom socket path, debug logging
//! DOCFLOW_SOCKET=/run/docflow.sock RUST_LOG=docflowd=debug docflowd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown
//! - SIGHUP: Reload configuration and push the theme to clients

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docflow_core::ThemeKind;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;
use crate::daemon;

/// docflow daemon - project state and command bridge
#[derive(Parser, Debug)]
#[command(name = "docflowd", version, about)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/docflow/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Project root to track (overrides the config file)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("docflow")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("docflowd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("docflowd.log")
}

fn read_pid() -> Option<i32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: i32) -> bool {
    // Signal 0 only checks that the process exists.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Returns the PID of a running daemon, clearing a stale PID file.
fn is_daemon_running() -> Option<i32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn stop_daemon(pid: i32) -> Result<()> {
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<DaemonConfig> {
    let config = match path {
        Some(path) => DaemonConfig::load_from(path)?,
        None => DaemonConfig::load()?,
    };
    Ok(config)
}

/// Entry point of the `docflowd` binary.
pub fn run() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        root: None,
    });

    match command {
        Command::Start { daemon, root } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'docflowd stop' to stop it first.");
                process::exit(1);
            }

            let mut config = load_config(args.config.as_ref())?;
            if let Some(root) = root {
                config.project_root = root;
            }
            // Daemonizing changes the working directory.
            config.project_root = config.resolved_root();

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config, args.config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };
            println!("Stopping daemon (PID {pid})...");
            stop_daemon(pid)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                process::exit(1);
            };
            println!("Daemon is running (PID {pid})");
            let config = load_config(args.config.as_ref())?;
            if config.socket_path.exists() {
                println!("Socket: {}", config.socket_path.display());
            }
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig, config_path: Option<PathBuf>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("docflowd=info".parse()?)
                .add_directive("docflow_core=info".parse()?)
                .add_directive("docflow_protocol=info".parse()?)
                .add_directive("docflow_term=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        root = %config.project_root.display(),
        "docflow daemon starting"
    );

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let (theme_tx, theme_rx) = watch::channel(config.theme);
    tokio::spawn(reload_on_sighup(theme_tx, config_path));

    if let Err(e) = daemon::serve(config, theme_rx, cancel_token).await {
        error!(error = %e, "Daemon error");
        return Err(e.into());
    }

    info!("docflow daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

/// Re-reads the config on every SIGHUP and publishes its theme.
async fn reload_on_sighup(theme: watch::Sender<ThemeKind>, config_path: Option<PathBuf>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(sighup) => sighup,
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable, config reload disabled");
            return;
        }
    };

    while sighup.recv().await.is_some() {
        match load_config(config_path.as_ref()) {
            Ok(config) => {
                let changed = theme.send_if_modified(|current| {
                    let changed = *current != config.theme;
                    *current = config.theme;
                    changed
                });
                info!(theme = %config.theme, changed, "Configuration reloaded");
            }
            Err(e) => warn!(error = %e, "Config reload failed, keeping current settings"),
        }
    }
}
