//! Daemon connection client for `docflow`.
//!
//! This module provides:
//! - [`DaemonClient`], one connection used for request/response style
//!   subcommands (`state`, `history`, `run`)
//! - [`watch`], a long-lived loop that reconnects with exponential backoff
//!   and forwards every notification to a callback
//!
//! The daemon never correlates notifications with requests, so each helper
//! reads until a notification of the kind it waits for shows up and keeps
//! the cached project state and theme current along the way.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use docflow_core::{CommandExecutionRecord, CommandId, LogEntry, ProjectState, ThemeKind};
use docflow_protocol::{
    parse_notification_line, CommandStatusPayload, Notification, ProtocolError, Request,
    RequestEnvelope, VersionError,
};
use docflowd::server::DEFAULT_SOCKET_PATH;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for the daemon client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path to the Unix socket where the daemon listens.
    pub socket_path: PathBuf,

    /// Initial delay before the first reconnect in watch mode.
    pub retry_initial_delay: Duration,

    /// Maximum delay between reconnect attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (2.0 doubles the delay each retry).
    pub retry_multiplier: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
        }
    }
}

impl ClientConfig {
    pub fn with_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    /// Delay to use after `current`, capped at `retry_max_delay`.
    fn next_delay(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.retry_multiplier;
        Duration::try_from_secs_f64(next)
            .unwrap_or(self.retry_max_delay)
            .min(self.retry_max_delay)
    }
}

// ============================================================================
// Daemon Client
// ============================================================================

/// One connection to the daemon.
///
/// # Connection Lifecycle
///
/// 1. Connect to the Unix socket
/// 2. The daemon pushes the current `state-update` and `theme-update`
/// 3. Requests are sent as newline-delimited JSON; notifications are read
///    until the expected kind arrives
pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    state: ProjectState,
    theme: ThemeKind,
}

impl DaemonClient {
    /// Connects and consumes the initial state and theme notifications.
    ///
    /// # Errors
    ///
    /// - `CliError::DaemonConnection` if the socket cannot be reached
    /// - `CliError::VersionMismatch` if the daemon's protocol major differs
    /// - `CliError::Daemon` if the daemon rejects the client
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| CliError::DaemonConnection {
                path: socket_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            state: ProjectState::default(),
            theme: ThemeKind::default(),
        };

        let mut got_state = false;
        let mut got_theme = false;
        while !(got_state && got_theme) {
            match client.recv().await? {
                Notification::StateUpdate { .. } => got_state = true,
                Notification::ThemeUpdate { .. } => got_theme = true,
                Notification::Error { message, code } => {
                    return Err(CliError::Daemon { message, code })
                }
                other => debug!(kind = other.kind(), "Skipping notification during connect"),
            }
        }

        debug!(socket_path = %socket_path.display(), "Connected to daemon");
        Ok(client)
    }

    /// Latest project state seen on this connection.
    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn theme(&self) -> ThemeKind {
        self.theme
    }

    pub async fn send(&mut self, request: &RequestEnvelope) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(kind = request.body.kind(), "Sent request to daemon");
        Ok(())
    }

    /// Reads the next notification.
    ///
    /// # Errors
    ///
    /// `CliError::ConnectionClosed` at end of stream; protocol errors for
    /// lines that fail their guard.
    pub async fn recv(&mut self) -> Result<Notification> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(CliError::ConnectionClosed);
        }

        let notification = parse_notification_line(&line)
            .map_err(version_mismatch)?
            .body;
        match &notification {
            Notification::StateUpdate { state } => self.state = state.clone(),
            Notification::ThemeUpdate { theme } => self.theme = *theme,
            _ => {}
        }
        Ok(notification)
    }

    /// Asks for and returns a fresh project state.
    pub async fn project_state(&mut self) -> Result<ProjectState> {
        self.send(&Request::get_project_state()).await?;
        loop {
            match self.recv().await? {
                Notification::StateUpdate { state } => return Ok(state),
                Notification::Error { message, code } => {
                    return Err(CliError::Daemon { message, code })
                }
                _ => {}
            }
        }
    }

    /// Returns the daemon's command history, oldest first.
    pub async fn command_history(&mut self) -> Result<Vec<CommandExecutionRecord>> {
        self.send(&Request::get_command_history()).await?;
        loop {
            match self.recv().await? {
                Notification::CommandStatusUpdate {
                    update: CommandStatusPayload::Batch(records),
                } => return Ok(records),
                Notification::Error { message, code } => {
                    return Err(CliError::Daemon { message, code })
                }
                _ => {}
            }
        }
    }

    /// Executes a slash command and waits for its final record.
    ///
    /// Log lines of the command are handed to `on_log` as they stream in.
    /// When `interrupt` fires the command is cancelled on the daemon and
    /// the cancelled record is returned.
    ///
    /// Concurrent commands started by other clients are told apart by the
    /// display string of the first record this call sees.
    pub async fn run_command<F>(
        &mut self,
        command: &str,
        args: &[String],
        interrupt: &CancellationToken,
        mut on_log: F,
    ) -> Result<CommandExecutionRecord>
    where
        F: FnMut(&LogEntry),
    {
        let display = std::iter::once(command)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.send(&Request::execute(command, args.to_vec())).await?;

        let mut tracked: Option<CommandId> = None;
        let mut cancel_sent = false;
        loop {
            let notification = tokio::select! {
                () = interrupt.cancelled(), if !cancel_sent && tracked.is_some() => {
                    cancel_sent = true;
                    info!(command_id = ?tracked, "Interrupted, cancelling command");
                    self.send(&Request::cancel(tracked.clone())).await?;
                    continue;
                }
                notification = self.recv() => notification?,
            };

            match notification {
                Notification::CommandStatusUpdate {
                    update: CommandStatusPayload::Single(record),
                } => {
                    if tracked.is_none() && record.command == display {
                        debug!(command_id = %record.command_id, "Tracking command");
                        tracked = Some(record.command_id.clone());
                    }
                    if tracked.as_ref() == Some(&record.command_id) && record.status.is_terminal() {
                        return Ok(record);
                    }
                }
                Notification::LogEntryStream { entry, command_id } => {
                    if command_id.is_some() && command_id == tracked {
                        on_log(&entry);
                    }
                }
                Notification::Error { message, code } => {
                    return Err(CliError::Daemon { message, code })
                }
                _ => {}
            }
        }
    }
}

fn version_mismatch(error: ProtocolError) -> CliError {
    match error {
        ProtocolError::Version(VersionError::Incompatible { got, expected }) => {
            CliError::VersionMismatch {
                client_version: expected,
                daemon_version: got,
            }
        }
        other => CliError::Protocol(other),
    }
}

// ============================================================================
// Watch Loop
// ============================================================================

/// Forwards every notification to `on_notification` until `cancel` fires,
/// reconnecting with exponential backoff whenever the daemon goes away.
///
/// `on_disconnect` runs once per lost connection.
pub async fn watch<F, D>(
    config: &ClientConfig,
    cancel: &CancellationToken,
    mut on_notification: F,
    mut on_disconnect: D,
) where
    F: FnMut(&Notification),
    D: FnMut(),
{
    info!(socket_path = %config.socket_path.display(), "Watching daemon");

    loop {
        let Some(mut client) = connect_with_retry(config, cancel).await else {
            info!("Watch cancelled");
            return;
        };

        // The initial notifications were consumed by connect.
        on_notification(&Notification::StateUpdate {
            state: client.state().clone(),
        });
        on_notification(&Notification::ThemeUpdate {
            theme: client.theme(),
        });

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Watch cancelled");
                    return;
                }
                result = client.recv() => match result {
                    Ok(notification) => on_notification(&notification),
                    Err(CliError::Protocol(e)) => warn!(error = %e, "Skipping bad notification"),
                    Err(e) => {
                        warn!(error = %e, "Connection to daemon lost");
                        break;
                    }
                },
            }
        }
        on_disconnect();
    }
}

/// Retries until connected or cancelled. `None` means cancelled.
async fn connect_with_retry(
    config: &ClientConfig,
    cancel: &CancellationToken,
) -> Option<DaemonClient> {
    let mut delay = config.retry_initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);
        match DaemonClient::connect(&config.socket_path).await {
            Ok(client) => {
                debug!(attempt, "Connection successful");
                return Some(client);
            }
            Err(e) if attempt == 1 => warn!(error = %e, "Daemon unavailable, will retry"),
            Err(e) => debug!(attempt, error = %e, "Connection attempt failed"),
        }

        tokio::select! {
            () = sleep(delay) => delay = config.next_delay(delay),
            () = cancel.cancelled() => return None,
        }
    }
}
