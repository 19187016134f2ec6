//! Runs slash commands through the external CLI inside a terminal session.
//!
//! ```text
//! execute(cmd) ──▶ lock session ──▶ run log: start ──▶ COMMAND_STARTED
//!                        │
//!                        ├──▶ send `<program> '<cmd> <args>'`
//!                        ├──▶ pump output ──▶ run log (LOG_ENTRY_ADDED, COMMAND_PROGRESS)
//!                        └──▶ select { cancel, detector }
//!                                 │
//!                                 ▼
//!                 run log: finish ──▶ COMMAND_COMPLETED | COMMAND_FAILED
//! ```
//!
//! One command runs at a time. Callers of `execute` queue on the session
//! lock in arrival order.
//!
//! # Panic-Free Guarantees
//!
//! Every failure (bad command, launch error, send error, timeout, cancel)
//! ends as a finished record, a COMMAND_FAILED event and an unsuccessful
//! [`CommandOutcome`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use docflow_core::{CommandId, CommandStatus, SlashCommand};
use docflow_term::{shell_quote, OutputChunk, TerminalLauncher, TerminalSession};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod completion;

pub use completion::{
    exit_marker_line, parse_exit_marker, Completion, CompletionDetector, CompletionKind,
    ExitMarkerDetector, SentinelFileDetector, TimeoutHeuristic, EXIT_MARKER,
};

use crate::bus::{EventPayload, StateEventBus};
use crate::runlog::RunLogHandle;

/// Where and how commands are run.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// The external CLI, e.g. `claude`.
    pub program: String,
    pub session_name: String,
    pub cwd: PathBuf,
}

/// Result of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command_id: CommandId,
    pub success: bool,
    pub status: CommandStatus,
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

pub struct CommandExecutionBridge {
    config: BridgeConfig,
    launcher: Arc<dyn TerminalLauncher>,
    detector: Arc<dyn CompletionDetector>,
    /// Also the execution queue: held for the whole run of a command.
    session: tokio::sync::Mutex<Option<Arc<dyn TerminalSession>>>,
    active: Mutex<Option<(CommandId, CancellationToken)>>,
    run_log: RunLogHandle,
    bus: StateEventBus,
}

/// Builds the line typed into the session.
pub fn command_line(program: &str, command: &SlashCommand, args: &[String]) -> String {
    let mut invocation = command.as_str().to_string();
    for arg in args {
        invocation.push(' ');
        invocation.push_str(arg);
    }
    format!("{program} {}", shell_quote(&invocation))
}

fn display_command(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl CommandExecutionBridge {
    pub fn new(
        config: BridgeConfig,
        launcher: Arc<dyn TerminalLauncher>,
        detector: Arc<dyn CompletionDetector>,
        run_log: RunLogHandle,
        bus: StateEventBus,
    ) -> Self {
        Self {
            config,
            launcher,
            detector,
            session: tokio::sync::Mutex::new(None),
            active: Mutex::new(None),
            run_log,
            bus,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Runs one slash command and waits for it to finish or be cancelled.
    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        cancel: CancellationToken,
    ) -> CommandOutcome {
        let command_id = CommandId::generate();
        let shown = display_command(command, args);

        let parsed = match SlashCommand::parse(command) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(command_id = %command_id, command, error = %e, "Rejected command");
                self.register(&command_id, &shown).await;
                return self
                    .finish_failed(command_id, Instant::now(), e.to_string(), false)
                    .await;
            }
        };

        // A command cancelled while queued never reaches the terminal.
        let mut session_slot = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(command_id = %command_id, command = %shown, "Command cancelled while queued");
                self.register(&command_id, &shown).await;
                return self.finish_cancelled(command_id, Instant::now()).await;
            }
            slot = self.session.lock() => slot,
        };
        self.set_active(Some((command_id.clone(), cancel.clone())));
        let start = Instant::now();
        self.register(&command_id, &shown).await;
        info!(command_id = %command_id, command = %shown, "Executing command");

        let outcome = self
            .run(&mut session_slot, &command_id, &parsed, args, &cancel, start)
            .await;

        self.set_active(None);
        outcome
    }

    async fn run(
        &self,
        session_slot: &mut Option<Arc<dyn TerminalSession>>,
        command_id: &CommandId,
        command: &SlashCommand,
        args: &[String],
        cancel: &CancellationToken,
        start: Instant,
    ) -> CommandOutcome {
        let session = match self.ensure_session(session_slot).await {
            Ok(session) => session,
            Err(e) => {
                return self
                    .finish_failed(command_id.clone(), start, format!("launch failed: {e}"), false)
                    .await;
            }
        };

        if cancel.is_cancelled() {
            info!(command_id = %command_id, "Command cancelled before it was sent");
            return self.finish_cancelled(command_id.clone(), start).await;
        }

        let line = command_line(&self.config.program, command, args);
        let line = self.detector.prepare(line, command_id).await;

        let mut detector_output = session.subscribe_output();
        let pump_stop = CancellationToken::new();
        let pump = tokio::spawn(pump_output(
            session.subscribe_output(),
            self.run_log.clone(),
            command_id.clone(),
            pump_stop.clone(),
        ));

        if let Err(e) = session.send_line(&line).await {
            pump_stop.cancel();
            let _ = pump.await;
            return self
                .finish_failed(command_id.clone(), start, format!("send failed: {e}"), false)
                .await;
        }

        let completion = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            completion = self.detector.wait(command_id, &mut detector_output) => Some(completion),
        };

        pump_stop.cancel();
        // Output published before completion must reach the record first.
        let _ = pump.await;

        match completion {
            None => {
                if let Err(e) = session.interrupt().await {
                    warn!(command_id = %command_id, error = %e, "Failed to interrupt session");
                }
                info!(command_id = %command_id, "Command cancelled");
                self.finish_cancelled(command_id.clone(), start).await
            }
            Some(Completion::Exited(0)) => {
                self.finish_completed(command_id.clone(), start, Some(0)).await
            }
            Some(Completion::AssumedSuccess) => {
                self.finish_completed(command_id.clone(), start, None).await
            }
            Some(Completion::Exited(code)) => {
                self.finish_exited(command_id.clone(), start, code).await
            }
            Some(Completion::TimedOut) => {
                self.finish_failed(
                    command_id.clone(),
                    start,
                    "no completion signal before timeout".to_string(),
                    false,
                )
                .await
            }
            Some(Completion::OutputClosed) => {
                session_slot.take();
                self.finish_failed(
                    command_id.clone(),
                    start,
                    "terminal session closed".to_string(),
                    false,
                )
                .await
            }
        }
    }

    async fn ensure_session(
        &self,
        slot: &mut Option<Arc<dyn TerminalSession>>,
    ) -> docflow_term::TerminalResult<Arc<dyn TerminalSession>> {
        if let Some(session) = slot.as_ref() {
            if session.is_alive().await {
                return Ok(Arc::clone(session));
            }
            debug!(session = session.name(), "Session no longer alive, relaunching");
        }
        let session = self
            .launcher
            .launch(&self.config.session_name, &self.config.cwd)
            .await?;
        info!(session = session.name(), cwd = %self.config.cwd.display(), "Terminal session ready");
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Cancels the running command if it matches `command_id` (any running
    /// command when `None`). Returns whether a command was signalled.
    pub fn cancel(&self, command_id: Option<&CommandId>) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some((running, token)) if command_id.map_or(true, |id| id == running) => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// The command currently holding the session, if any.
    pub fn running(&self) -> Option<CommandId> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(id, _)| id.clone())
    }

    /// Closes the terminal session once the running command (if any) ends.
    pub async fn shutdown(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            if let Err(e) = session.close().await {
                warn!(session = session.name(), error = %e, "Failed to close session");
            }
        }
    }

    // ========================================================================
    // Record and event bookkeeping
    // ========================================================================

    fn set_active(&self, value: Option<(CommandId, CancellationToken)>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    async fn register(&self, command_id: &CommandId, display: &str) {
        if let Err(e) = self.run_log.start(command_id.clone(), display).await {
            warn!(command_id = %command_id, error = %e, "Run log unavailable");
        }
        self.bus.emit(EventPayload::CommandStarted {
            command_id: command_id.clone(),
            command: display.to_string(),
        });
    }

    async fn record_finish(
        &self,
        command_id: &CommandId,
        status: CommandStatus,
        exit_code: Option<i32>,
    ) {
        if let Err(e) = self
            .run_log
            .finish(command_id.clone(), status, exit_code)
            .await
        {
            warn!(command_id = %command_id, error = %e, "Failed to finish record");
        }
    }

    async fn finish_completed(
        &self,
        command_id: CommandId,
        start: Instant,
        exit_code: Option<i32>,
    ) -> CommandOutcome {
        let duration = start.elapsed();
        self.record_finish(&command_id, CommandStatus::Completed, exit_code)
            .await;
        info!(command_id = %command_id, duration_ms = millis(duration), "Command completed");
        self.bus.emit(EventPayload::CommandCompleted {
            command_id: command_id.clone(),
            success: true,
            duration_ms: millis(duration),
        });
        CommandOutcome {
            command_id,
            success: true,
            status: CommandStatus::Completed,
            duration,
            exit_code,
            error: None,
        }
    }

    async fn finish_exited(&self, command_id: CommandId, start: Instant, code: i32) -> CommandOutcome {
        let duration = start.elapsed();
        let error = format!("exited with code {code}");
        self.record_finish(&command_id, CommandStatus::Failed, Some(code))
            .await;
        warn!(command_id = %command_id, code, "Command failed");
        self.bus.emit(EventPayload::CommandFailed {
            command_id: command_id.clone(),
            error: error.clone(),
            cancelled: false,
        });
        CommandOutcome {
            command_id,
            success: false,
            status: CommandStatus::Failed,
            duration,
            exit_code: Some(code),
            error: Some(error),
        }
    }

    async fn finish_cancelled(&self, command_id: CommandId, start: Instant) -> CommandOutcome {
        self.finish_failed(command_id, start, "cancelled".to_string(), true)
            .await
    }

    async fn finish_failed(
        &self,
        command_id: CommandId,
        start: Instant,
        error: String,
        cancelled: bool,
    ) -> CommandOutcome {
        let duration = start.elapsed();
        let status = if cancelled {
            CommandStatus::Cancelled
        } else {
            CommandStatus::Failed
        };
        self.record_finish(&command_id, status, None).await;
        if !cancelled {
            warn!(command_id = %command_id, error = %error, "Command failed");
        }
        self.bus.emit(EventPayload::CommandFailed {
            command_id: command_id.clone(),
            error: error.clone(),
            cancelled,
        });
        CommandOutcome {
            command_id,
            success: false,
            status,
            duration,
            exit_code: None,
            error: Some(error),
        }
    }
}

/// Forwards session output to the run log until `stop`, then drains what
/// is already queued.
async fn pump_output(
    mut output: broadcast::Receiver<OutputChunk>,
    run_log: RunLogHandle,
    command_id: CommandId,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            received = output.recv() => match received {
                Ok(chunk) => forward(&run_log, &command_id, chunk).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(command_id = %command_id, skipped, "Output pump lagged");
                }
                Err(RecvError::Closed) => return,
            },
            () = stop.cancelled() => break,
        }
    }

    loop {
        match output.try_recv() {
            Ok(chunk) => forward(&run_log, &command_id, chunk).await,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

async fn forward(run_log: &RunLogHandle, command_id: &CommandId, chunk: OutputChunk) {
    if chunk.data.contains(EXIT_MARKER) {
        return;
    }
    run_log.append_output(command_id.clone(), chunk).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventKind;
    use crate::runlog::spawn_run_log;
    use async_trait::async_trait;
    use docflow_term::{TerminalError, TerminalResult, OUTPUT_CHANNEL_CAPACITY};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Responder = Box<dyn Fn(&str) -> Vec<OutputChunk> + Send + Sync>;

    struct FakeSession {
        alive: AtomicBool,
        sent: Mutex<Vec<String>>,
        interrupts: AtomicUsize,
        output: broadcast::Sender<OutputChunk>,
        responder: Option<Arc<Responder>>,
        fail_send: bool,
    }

    #[async_trait]
    impl TerminalSession for FakeSession {
        fn name(&self) -> &str {
            "fake"
        }

        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn send_line(&self, line: &str) -> TerminalResult<()> {
            if self.fail_send {
                return Err(TerminalError::Closed("fake".to_string()));
            }
            self.sent.lock().unwrap().push(line.to_string());
            if let Some(responder) = &self.responder {
                for chunk in responder(line) {
                    let _ = self.output.send(chunk);
                }
            }
            Ok(())
        }

        async fn interrupt(&self) -> TerminalResult<()> {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn subscribe_output(&self) -> broadcast::Receiver<OutputChunk> {
            self.output.subscribe()
        }

        async fn close(&self) -> TerminalResult<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        launches: AtomicUsize,
        fail: bool,
        fail_send: bool,
        responder: Option<Arc<Responder>>,
        sessions: Mutex<Vec<Arc<FakeSession>>>,
    }

    impl FakeLauncher {
        fn last_session(&self) -> Arc<FakeSession> {
            Arc::clone(self.sessions.lock().unwrap().last().unwrap())
        }
    }

    #[async_trait]
    impl TerminalLauncher for FakeLauncher {
        async fn launch(&self, _name: &str, _cwd: &Path) -> TerminalResult<Arc<dyn TerminalSession>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TerminalError::Launch(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no terminal",
                )));
            }
            let (output, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
            let session = Arc::new(FakeSession {
                alive: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
                interrupts: AtomicUsize::new(0),
                output,
                responder: self.responder.clone(),
                fail_send: self.fail_send,
            });
            self.sessions.lock().unwrap().push(Arc::clone(&session));
            Ok(session)
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig {
            program: "claude".to_string(),
            session_name: "docflow-test".to_string(),
            cwd: PathBuf::from("/tmp"),
        }
    }

    fn bridge(
        launcher: Arc<FakeLauncher>,
        detector: Arc<dyn CompletionDetector>,
    ) -> (Arc<CommandExecutionBridge>, StateEventBus, RunLogHandle) {
        let bus = StateEventBus::new();
        let run_log = spawn_run_log(bus.clone());
        let bridge = Arc::new(CommandExecutionBridge::new(
            config(),
            launcher,
            detector,
            run_log.clone(),
            bus.clone(),
        ));
        (bridge, bus, run_log)
    }

    fn command_kinds(bus: &StateEventBus) -> Vec<EventKind> {
        bus.get_history(None, None)
            .into_iter()
            .map(|e| e.kind())
            .filter(|k| {
                matches!(
                    k,
                    EventKind::CommandStarted | EventKind::CommandCompleted | EventKind::CommandFailed
                )
            })
            .collect()
    }

    #[test]
    fn test_command_line_quotes_invocation() {
        let command = SlashCommand::parse("/2-epic:1-start").unwrap();
        let line = command_line("claude", &command, &["it's".to_string(), "x".to_string()]);
        assert_eq!(line, r"claude '/2-epic:1-start it'\''s x'");
    }

    #[tokio::test]
    async fn test_execute_with_timeout_heuristic() {
        let launcher = Arc::new(FakeLauncher::default());
        let (bridge, bus, run_log) = bridge(
            Arc::clone(&launcher),
            Arc::new(TimeoutHeuristic::new(Duration::from_millis(30))),
        );

        let outcome = bridge
            .execute("/status", &["now".to_string()], CancellationToken::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.status, CommandStatus::Completed);
        assert_eq!(
            *launcher.last_session().sent.lock().unwrap(),
            vec!["claude '/status now'".to_string()]
        );
        assert_eq!(
            command_kinds(&bus),
            vec![EventKind::CommandStarted, EventKind::CommandCompleted]
        );
        let record = run_log.get(outcome.command_id).await.unwrap();
        assert_eq!(record.status, CommandStatus::Completed);
        assert_eq!(record.command, "/status now");
        assert!(bridge.running().is_none());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_and_marks_cancelled() {
        let launcher = Arc::new(FakeLauncher::default());
        let (bridge, bus, run_log) = bridge(
            Arc::clone(&launcher),
            Arc::new(TimeoutHeuristic::new(Duration::from_secs(60))),
        );

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = bridge.execute("/long", &[], token).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!outcome.success);
        assert_eq!(outcome.status, CommandStatus::Cancelled);
        assert_eq!(launcher.last_session().interrupts.load(Ordering::SeqCst), 1);

        let failed = bus.get_history(Some(EventKind::CommandFailed), None);
        assert_eq!(failed.len(), 1);
        match &failed[0].payload {
            EventPayload::CommandFailed { cancelled, .. } => assert!(cancelled),
            other => panic!("unexpected payload: {other:?}"),
        }
        let record = run_log.get(outcome.command_id).await.unwrap();
        assert_eq!(record.status, CommandStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_by_id() {
        let launcher = Arc::new(FakeLauncher::default());
        let (bridge, _bus, _run_log) = bridge(
            Arc::clone(&launcher),
            Arc::new(TimeoutHeuristic::new(Duration::from_secs(60))),
        );
        assert!(!bridge.cancel(None));

        let runner = Arc::clone(&bridge);
        let task = tokio::spawn(async move {
            runner
                .execute("/long", &[], CancellationToken::new())
                .await
        });

        let running = loop {
            if let Some(id) = bridge.running() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(!bridge.cancel(Some(&CommandId::new("cmd-other"))));
        assert!(bridge.cancel(Some(&running)));

        let outcome = task.await.unwrap();
        assert_eq!(outcome.command_id, running);
        assert_eq!(outcome.status, CommandStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_launch_failure_fails_command() {
        let launcher = Arc::new(FakeLauncher {
            fail: true,
            ..FakeLauncher::default()
        });
        let (bridge, bus, run_log) = bridge(
            launcher,
            Arc::new(TimeoutHeuristic::new(Duration::from_millis(10))),
        );

        let outcome = bridge.execute("/status", &[], CancellationToken::new()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status, CommandStatus::Failed);
        assert!(outcome.error.unwrap().contains("launch failed"));
        assert_eq!(
            command_kinds(&bus),
            vec![EventKind::CommandStarted, EventKind::CommandFailed]
        );
        let record = run_log.get(outcome.command_id).await.unwrap();
        assert_eq!(record.status, CommandStatus::Failed);
    }

    #[tokio::test]
    async fn test_send_failure_fails_command() {
        let launcher = Arc::new(FakeLauncher {
            fail_send: true,
            ..FakeLauncher::default()
        });
        let (bridge, bus, _run_log) = bridge(
            launcher,
            Arc::new(TimeoutHeuristic::new(Duration::from_millis(10))),
        );
        let outcome = bridge.execute("/status", &[], CancellationToken::new()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("send failed"));
        assert_eq!(bus.get_history(Some(EventKind::CommandFailed), None).len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_command_never_launches() {
        let launcher = Arc::new(FakeLauncher::default());
        let (bridge, bus, _run_log) = bridge(
            Arc::clone(&launcher),
            Arc::new(TimeoutHeuristic::new(Duration::from_millis(10))),
        );
        let outcome = bridge.execute("status", &[], CancellationToken::new()).await;
        assert!(!outcome.success);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
        assert_eq!(bus.get_history(Some(EventKind::CommandFailed), None).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_executes_are_serialized() {
        let launcher = Arc::new(FakeLauncher::default());
        let (bridge, bus, _run_log) = bridge(
            Arc::clone(&launcher),
            Arc::new(TimeoutHeuristic::new(Duration::from_millis(40))),
        );

        let first = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.execute("/a", &[], CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.execute("/b", &[], CancellationToken::new()).await })
        };
        assert!(first.await.unwrap().success);
        assert!(second.await.unwrap().success);

        assert_eq!(
            command_kinds(&bus),
            vec![
                EventKind::CommandStarted,
                EventKind::CommandCompleted,
                EventKind::CommandStarted,
                EventKind::CommandCompleted,
            ]
        );
        // One session reused for both.
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_while_queued_is_never_sent() {
        let launcher = Arc::new(FakeLauncher::default());
        let (bridge, bus, run_log) = bridge(
            Arc::clone(&launcher),
            Arc::new(TimeoutHeuristic::new(Duration::from_millis(500))),
        );

        let first = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.execute("/a", &[], CancellationToken::new()).await })
        };
        while bridge.running().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let token = CancellationToken::new();
        token.cancel();
        let started = std::time::Instant::now();
        let outcome = bridge.execute("/b", &[], token).await;

        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(!outcome.success);
        assert_eq!(outcome.status, CommandStatus::Cancelled);
        let record = run_log.get(outcome.command_id).await.unwrap();
        assert_eq!(record.status, CommandStatus::Cancelled);
        let failed = bus.get_history(Some(EventKind::CommandFailed), None);
        assert_eq!(failed.len(), 1);

        assert!(first.await.unwrap().success);
        let session = launcher.last_session();
        assert_eq!(*session.sent.lock().unwrap(), vec!["claude '/a'".to_string()]);
        assert_eq!(session.interrupts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dead_session_is_relaunched() {
        let launcher = Arc::new(FakeLauncher::default());
        let (bridge, _bus, _run_log) = bridge(
            Arc::clone(&launcher),
            Arc::new(TimeoutHeuristic::new(Duration::from_millis(5))),
        );
        bridge.execute("/a", &[], CancellationToken::new()).await;
        launcher.last_session().alive.store(false, Ordering::SeqCst);
        bridge.execute("/b", &[], CancellationToken::new()).await;
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }

    fn marker_responder(code: i32) -> Arc<Responder> {
        let responder: Responder = Box::new(move |line: &str| {
            let start = line.find(EXIT_MARKER).unwrap() + EXIT_MARKER.len();
            let id = &line[start..line.rfind(':').unwrap()];
            vec![
                OutputChunk::stdout("working on it\n"),
                OutputChunk::stderr("a warning\n"),
                OutputChunk::stdout(format!("{}\n", exit_marker_line(&CommandId::new(id), code))),
            ]
        });
        Arc::new(responder)
    }

    #[tokio::test]
    async fn test_exit_marker_success_captures_output() {
        let launcher = Arc::new(FakeLauncher {
            responder: Some(marker_responder(0)),
            ..FakeLauncher::default()
        });
        let (bridge, bus, run_log) = bridge(
            launcher,
            Arc::new(ExitMarkerDetector::new(Duration::from_secs(5))),
        );

        let outcome = bridge.execute("/build", &[], CancellationToken::new()).await;
        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));

        let record = run_log.get(outcome.command_id).await.unwrap();
        assert_eq!(record.stdout, "working on it\n");
        assert_eq!(record.stderr, "a warning\n");
        assert_eq!(record.exit_code, Some(0));
        assert_eq!(bus.get_history(Some(EventKind::LogEntryAdded), None).len(), 2);
    }

    #[tokio::test]
    async fn test_exit_marker_nonzero_fails() {
        let launcher = Arc::new(FakeLauncher {
            responder: Some(marker_responder(4)),
            ..FakeLauncher::default()
        });
        let (bridge, bus, run_log) = bridge(
            launcher,
            Arc::new(ExitMarkerDetector::new(Duration::from_secs(5))),
        );

        let outcome = bridge.execute("/build", &[], CancellationToken::new()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status, CommandStatus::Failed);
        assert_eq!(outcome.exit_code, Some(4));
        assert_eq!(
            command_kinds(&bus),
            vec![EventKind::CommandStarted, EventKind::CommandFailed]
        );
        let record = run_log.get(outcome.command_id).await.unwrap();
        assert_eq!(record.exit_code, Some(4));
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let launcher = Arc::new(FakeLauncher::default());
        let (bridge, _bus, _run_log) = bridge(
            Arc::clone(&launcher),
            Arc::new(TimeoutHeuristic::new(Duration::from_millis(5))),
        );
        bridge.execute("/a", &[], CancellationToken::new()).await;
        bridge.shutdown().await;
        assert!(!launcher.last_session().alive.load(Ordering::SeqCst));
    }
}
