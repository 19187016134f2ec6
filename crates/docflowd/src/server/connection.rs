//! Connection handler for individual rendering surfaces.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Sends the current project state and theme on connect
//! - Parses incoming requests through the protocol's type guards
//! - Turns bus events into notifications for this client
//! - Throttles the log stream through its own [`LogStreamThrottler`]
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Malformed requests are answered with an `error` notification
//! - Write failures end the connection, never the daemon

use std::time::Duration;

use docflow_core::{LogEntry, LogLevel, ProjectState, SlashCommand, MAX_LOG_ENTRIES};
use docflow_protocol::{
    parse_request_line, Notification, NotificationEnvelope, ProtocolError, Request,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ServerContext;
use crate::bus::{EventPayload, StateEvent};
use crate::runlog::RunLogHandle;
use crate::state::InitProgress;
use crate::throttle::{LogDelivery, LogStreamThrottler, LOG_STREAM_WINDOW};

/// Maximum request size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue for notifications produced by background tasks of this client.
const OUTBOUND_BUFFER: usize = 256;

/// Error codes carried on `error` notifications.
pub const BAD_REQUEST: &str = "bad-request";
pub const INCOMPATIBLE_VERSION: &str = "incompatible-version";
pub const NO_RUNNING_COMMAND: &str = "no-running-command";
pub const INIT_FAILED: &str = "init-failed";

/// What a bus event becomes for one client.
#[derive(Debug)]
pub enum EventRoute {
    Send(NotificationEnvelope),
    /// Goes through the log throttler first.
    Log(LogEntry),
    Skip,
}

/// Maps a bus event to its notification. Command events are answered with
/// the record's current state from the run log.
pub async fn route_event(event: &StateEvent, run_log: &RunLogHandle) -> EventRoute {
    match &event.payload {
        EventPayload::ProjectStateChanged { state } => {
            EventRoute::Send(Notification::state_update((**state).clone()))
        }
        EventPayload::CommandStarted { command_id, .. }
        | EventPayload::CommandProgress { command_id }
        | EventPayload::CommandCompleted { command_id, .. }
        | EventPayload::CommandFailed { command_id, .. } => {
            match run_log.get(command_id.clone()).await {
                Some(record) => EventRoute::Send(Notification::command_status(record)),
                None => EventRoute::Skip,
            }
        }
        EventPayload::LogEntryAdded { entry } => EventRoute::Log(entry.clone()),
        EventPayload::ThemeChanged { theme } => EventRoute::Send(Notification::theme(*theme)),
        EventPayload::EpicSelected { .. } | EventPayload::StorySelected { .. } => EventRoute::Skip,
    }
}

/// Converts one initialization report into a notification.
pub fn init_progress_notification(progress: &InitProgress) -> NotificationEnvelope {
    let log = LogEntry::new(
        LogLevel::Info,
        format!(
            "Initialization check {} ({}s elapsed): {}",
            progress.attempt,
            progress.elapsed.as_secs(),
            progress.phase
        ),
    );
    Notification::init_progress(progress.percent, progress.phase.label(), vec![log])
}

/// Connection handler for a single client.
pub struct ConnectionHandler {
    client_id: String,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: BufWriter<OwnedWriteHalf>,
    context: ServerContext,
    shutdown: CancellationToken,
    outbound_tx: mpsc::Sender<NotificationEnvelope>,
    outbound_rx: Option<mpsc::Receiver<NotificationEnvelope>>,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        context: ServerContext,
        shutdown: CancellationToken,
        connection_number: u64,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        Self {
            client_id: format!("client-{connection_number}"),
            reader: Some(BufReader::new(reader)),
            writer: BufWriter::new(writer),
            context,
            shutdown,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Runs until the client disconnects or the daemon shuts down.
    pub async fn run(mut self) {
        info!(client_id = %self.client_id, "Client connected");

        if let Err(e) = self.serve().await {
            debug!(client_id = %self.client_id, error = %e, "Connection closed");
        }

        info!(client_id = %self.client_id, "Client disconnected");
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        // Subscribe before the initial snapshot so no change slips between.
        let mut events = self.context.bus.subscribe();

        let state = self.context.snapshot.get().await;
        self.send_state((*state).clone()).await?;
        let theme = *self.context.theme.borrow();
        self.send_message(Notification::theme(theme)).await?;

        let (Some(reader), Some(mut outbound)) = (self.reader.take(), self.outbound_rx.take())
        else {
            return Ok(());
        };
        let mut lines = spawn_reader(reader);
        let shutdown = self.shutdown.clone();

        let (log_tx, mut log_rx) = mpsc::channel::<LogDelivery>(MAX_LOG_ENTRIES);
        let throttler = LogStreamThrottler::new(LOG_STREAM_WINDOW, log_tx);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!(client_id = %self.client_id, "Shutdown, closing connection");
                    return Ok(());
                }

                line = lines.recv() => match line {
                    Some(Ok(line)) => self.handle_line(&line).await?,
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                },

                event = events.recv() => match event {
                    Ok(event) => match route_event(&event, &self.context.run_log).await {
                        EventRoute::Send(msg) => self.send_message(msg).await?,
                        EventRoute::Log(entry) => throttler.push(&self.client_id, entry),
                        EventRoute::Skip => {}
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client_id = %self.client_id, skipped, "Client lagged behind bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },

                Some(delivery) = log_rx.recv() => {
                    self.send_message(Notification::log_entry(delivery.entry)).await?;
                }

                Some(msg) = outbound.recv() => {
                    self.send_message(msg).await?;
                }
            }
        }
    }

    async fn send_state(&mut self, state: ProjectState) -> Result<(), ConnectionError> {
        self.send_message(Notification::state_update(state)).await
    }

    async fn handle_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        match parse_request_line(line) {
            Ok(envelope) => {
                debug!(client_id = %self.client_id, kind = envelope.body.kind(), "Received request");
                self.handle_request(envelope.body).await
            }
            Err(ProtocolError::Version(e)) => {
                warn!(client_id = %self.client_id, error = %e, "Rejected request");
                self.send_message(Notification::error_with_code(e.to_string(), INCOMPATIBLE_VERSION))
                    .await
            }
            Err(e) => {
                debug!(client_id = %self.client_id, error = %e, "Malformed request");
                self.send_message(Notification::error_with_code(e.to_string(), BAD_REQUEST))
                    .await
            }
        }
    }

    async fn handle_request(&mut self, request: Request) -> Result<(), ConnectionError> {
        match request {
            Request::ExecuteCommand { command, args } => {
                self.start_command(command, args);
            }

            Request::GetProjectState => {
                let state = self.context.snapshot.get().await;
                self.send_state((*state).clone()).await?;
            }

            Request::GetCommandHistory => {
                let history = self.context.run_log.history().await;
                self.send_message(Notification::command_history(history))
                    .await?;
            }

            Request::CancelCommand { command_id } => {
                if !self.context.bridge.cancel(command_id.as_ref()) {
                    let message = match command_id {
                        Some(id) => format!("command {id} is not running"),
                        None => "no command is running".to_string(),
                    };
                    self.send_message(Notification::error_with_code(message, NO_RUNNING_COMMAND))
                        .await?;
                }
            }

            Request::SelectEpic { epic_id } => {
                self.context.bus.emit(EventPayload::EpicSelected { epic_id });
            }

            Request::SelectStory { story_id } => {
                self.context.bus.emit(EventPayload::StorySelected { story_id });
            }
        }
        Ok(())
    }

    /// Runs the command in the background; its progress reaches this and
    /// every other client through the bus.
    fn start_command(&self, command: String, args: Vec<String>) {
        let is_init = SlashCommand::parse(&command).is_ok_and(|c| c.is_init_project());
        let bridge = std::sync::Arc::clone(&self.context.bridge);
        let token = self.shutdown.child_token();
        let client_id = self.client_id.clone();

        tokio::spawn(async move {
            let outcome = bridge.execute(&command, &args, token).await;
            debug!(
                client_id = %client_id,
                command_id = %outcome.command_id,
                success = outcome.success,
                "Command request finished"
            );
        });

        if is_init {
            self.watch_initialization();
        }
    }

    /// Streams `init-progress-update` notifications while the project
    /// documents are being generated.
    fn watch_initialization(&self) {
        let manager = self.context.snapshot.manager().clone();
        let timeout = self.context.init_timeout;
        let outbound = self.outbound_tx.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let progress_tx = outbound.clone();
            let wait = manager.wait_for_initialization_with_validation_and_progress(
                timeout,
                move |progress| {
                    if progress_tx
                        .try_send(init_progress_notification(&progress))
                        .is_err()
                    {
                        debug!("Init progress dropped");
                    }
                },
            );

            let outcome = tokio::select! {
                () = shutdown.cancelled() => return,
                outcome = wait => outcome,
            };

            if outcome.success {
                return;
            }
            let message = match outcome.validation {
                Some(validation) => format!(
                    "project structure incomplete (missing: {:?}, invalid: {:?})",
                    validation.missing_files, validation.invalid_files
                ),
                None => "project initialization timed out".to_string(),
            };
            let _ = outbound
                .send(Notification::error_with_code(message, INIT_FAILED))
                .await;
        });
    }

    /// Sends a notification to the client.
    async fn send_message(&mut self, msg: NotificationEnvelope) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::Serialize(e.to_string()))?;

        let writer = &mut self.writer;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Reads request lines on a dedicated task so the handler can select over
/// them without losing partial reads.
fn spawn_reader(
    mut reader: BufReader<OwnedReadHalf>,
) -> mpsc::Receiver<Result<String, ConnectionError>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            let mut line = String::new();
            let result = match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) if line.len() > MAX_MESSAGE_SIZE => Err(ConnectionError::MessageTooLarge {
                    size: line.len(),
                    max: MAX_MESSAGE_SIZE,
                }),
                Ok(_) => Ok(line),
                Err(e) => Err(ConnectionError::Io(e.to_string())),
            };
            let fatal = result.is_err();
            if tx.send(result).await.is_err() || fatal {
                break;
            }
        }
    });
    rx
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::StateEventBus;
    use crate::runlog::spawn_run_log;
    use crate::state::InitPhase;
    use docflow_core::{CommandId, ThemeKind};
    use std::sync::Arc;

    #[test]
    fn test_message_size_error() {
        let err = ConnectionError::MessageTooLarge {
            size: 2_000_000,
            max: MAX_MESSAGE_SIZE,
        };
        assert!(err.to_string().contains("2000000"));
    }

    #[test]
    fn test_init_progress_notification() {
        let msg = init_progress_notification(&InitProgress {
            phase: InitPhase::Polling,
            attempt: 3,
            elapsed: Duration::from_secs(4),
            percent: 12,
        });
        match msg.body {
            Notification::InitProgressUpdate {
                progress,
                status,
                logs,
            } => {
                assert_eq!(progress, 12);
                assert_eq!(status, "polling");
                assert_eq!(logs.len(), 1);
                assert!(logs[0].message.contains("check 3"));
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_route_event() {
        let bus = StateEventBus::new();
        let run_log = spawn_run_log(bus.clone());

        let state = bus.emit(EventPayload::ProjectStateChanged {
            state: Arc::new(ProjectState::default()),
        });
        assert!(matches!(
            route_event(&state, &run_log).await,
            EventRoute::Send(NotificationEnvelope {
                body: Notification::StateUpdate { .. },
                ..
            })
        ));

        let theme = bus.emit(EventPayload::ThemeChanged {
            theme: ThemeKind::Light,
        });
        assert!(matches!(
            route_event(&theme, &run_log).await,
            EventRoute::Send(NotificationEnvelope {
                body: Notification::ThemeUpdate {
                    theme: ThemeKind::Light
                },
                ..
            })
        ));

        let selected = bus.emit(EventPayload::EpicSelected {
            epic_id: "1".to_string(),
        });
        assert!(matches!(route_event(&selected, &run_log).await, EventRoute::Skip));

        // Unknown record: nothing to report.
        let unknown = bus.emit(EventPayload::CommandProgress {
            command_id: CommandId::new("cmd-none"),
        });
        assert!(matches!(route_event(&unknown, &run_log).await, EventRoute::Skip));

        let id = CommandId::new("cmd-1-0");
        run_log.start(id.clone(), "/status").await.unwrap();
        let started = bus.emit(EventPayload::CommandStarted {
            command_id: id.clone(),
            command: "/status".to_string(),
        });
        match route_event(&started, &run_log).await {
            EventRoute::Send(NotificationEnvelope {
                body: Notification::CommandStatusUpdate { .. },
                ..
            }) => {}
            other => panic!("unexpected route: {other:?}"),
        }

        let log = bus.emit(EventPayload::LogEntryAdded {
            entry: LogEntry::new(LogLevel::Info, "hello"),
        });
        assert!(matches!(route_event(&log, &run_log).await, EventRoute::Log(_)));
    }
}
