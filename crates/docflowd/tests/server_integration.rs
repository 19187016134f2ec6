//! Integration tests for the Unix socket server.
//!
//! These tests run the whole daemon (bus, watcher, run log, bridge and
//! server) against a temporary project root, with commands executed by a
//! plain `sh` session running `echo` instead of the real CLI.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free behavior of
//! production code is checked through assertions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use docflow_core::{paths, CommandStatus, ThemeKind, INIT_PROJECT_COMMAND};
use docflow_protocol::{
    parse_notification_line, CommandStatusPayload, Notification, ProtocolVersion, Request,
};
use docflow_term::LauncherKind;
use docflowd::bridge::CompletionKind;
use docflowd::config::DaemonConfig;
use docflowd::daemon;
use docflowd::server::{BAD_REQUEST, INCOMPATIBLE_VERSION, NO_RUNNING_COMMAND};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum time to wait for an expected notification
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

const LONG_TEXT: &str = "This document is long enough to pass content validation for docflow.";

// ============================================================================
// Test Helpers
// ============================================================================

struct TestDaemon {
    socket_path: PathBuf,
    root: PathBuf,
    cancel_token: CancellationToken,
    theme: watch::Sender<ThemeKind>,
    handle: tokio::task::JoinHandle<()>,
    _temp_dir: TempDir,
}

impl TestDaemon {
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let root = temp_dir.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        let socket_path = temp_dir.path().join("docflow.sock");

        let mut config = DaemonConfig::default();
        config.project_root = root.clone();
        config.socket_path = socket_path.clone();
        config.bridge.program = "echo".to_string();
        config.bridge.launcher = LauncherKind::Shell;
        config.bridge.completion = CompletionKind::ExitMarker;
        config.bridge.timeout_secs = 10;
        config.init.poll_interval_ms = 50;
        config.init.timeout_secs = 5;

        let (theme, theme_rx) = watch::channel(ThemeKind::Dark);
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let handle = tokio::spawn(async move {
            daemon::serve(config, theme_rx, token).await.unwrap();
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT && !socket_path.exists() {
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        Self {
            socket_path,
            root,
            cancel_token,
            theme,
            handle,
            _temp_dir: temp_dir,
        }
    }

    /// Connects and consumes the initial state and theme notifications.
    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        let mut client = TestClient::new(stream);
        assert!(matches!(client.recv().await, Notification::StateUpdate { .. }));
        assert!(matches!(client.recv().await, Notification::ThemeUpdate { .. }));
        client
    }

    fn write(&self, relative: &str, content: &str) {
        write_file(&self.root, relative, content);
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(RECV_TIMEOUT, self.handle)
            .await
            .expect("daemon stops")
            .unwrap();
    }
}

fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send<T: serde::Serialize>(&mut self, msg: &T) {
        let json = serde_json::to_string(msg).unwrap();
        self.send_raw(&json).await;
    }

    async fn recv(&mut self) -> Notification {
        let mut line = String::new();
        let read = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("notification within timeout")
            .unwrap();
        assert!(read > 0, "server closed the connection");
        parse_notification_line(&line).unwrap().body
    }

    /// Reads notifications until one satisfies `pred`.
    async fn recv_until<F>(&mut self, mut pred: F) -> Notification
    where
        F: FnMut(&Notification) -> bool,
    {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            assert!(tokio::time::Instant::now() < deadline, "expected notification never arrived");
            let msg = self.recv().await;
            if pred(&msg) {
                return msg;
            }
        }
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_connect_receives_state_and_theme() {
    let daemon = TestDaemon::spawn().await;
    let stream = UnixStream::connect(&daemon.socket_path).await.unwrap();
    let mut client = TestClient::new(stream);

    match client.recv().await {
        Notification::StateUpdate { state } => {
            assert!(!state.initialized);
            assert!(state.epics.is_empty());
            assert!(!state.has_feedback);
        }
        other => panic!("Expected state-update, got {other:?}"),
    }
    match client.recv().await {
        Notification::ThemeUpdate { theme } => assert_eq!(theme, ThemeKind::Dark),
        other => panic!("Expected theme-update, got {other:?}"),
    }

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_get_project_state_reads_documents() {
    let daemon = TestDaemon::spawn().await;
    daemon.write(paths::EPICS, "## Epic #1: Setup [active]\nFirst steps\n");
    // Let the watcher settle so the snapshot is fresh.
    sleep(Duration::from_millis(500)).await;

    let mut client = daemon.connect().await;
    client.send(&Request::get_project_state()).await;
    let msg = client
        .recv_until(|n| matches!(n, Notification::StateUpdate { state } if state.initialized))
        .await;
    let Notification::StateUpdate { state } = msg else {
        unreachable!()
    };
    assert_eq!(state.epics.len(), 1);
    assert_eq!(state.epics[0].title, "Setup");

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_file_change_pushes_state_update() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    daemon.write(paths::EPICS, "## Epic #7: Watched [planned]\n");

    let msg = client
        .recv_until(|n| matches!(n, Notification::StateUpdate { state } if state.initialized))
        .await;
    let Notification::StateUpdate { state } = msg else {
        unreachable!()
    };
    assert_eq!(state.epics[0].id, "7");

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_theme_change_is_pushed() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    daemon.theme.send(ThemeKind::Light).unwrap();
    let msg = client
        .recv_until(|n| matches!(n, Notification::ThemeUpdate { .. }))
        .await;
    assert_eq!(
        msg,
        Notification::ThemeUpdate {
            theme: ThemeKind::Light
        }
    );

    daemon.shutdown().await;
}

// ============================================================================
// Command Tests
// ============================================================================

#[tokio::test]
async fn test_execute_command_streams_status_and_logs() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client
        .send(&Request::execute("/status", vec!["--brief".to_string()]))
        .await;

    let mut saw_log = false;
    let record = loop {
        match client.recv().await {
            Notification::LogEntryStream { entry, command_id } => {
                assert!(command_id.is_some());
                if entry.message.contains("/status --brief") {
                    saw_log = true;
                }
            }
            Notification::CommandStatusUpdate {
                update: CommandStatusPayload::Single(record),
            } if record.status.is_terminal() => break record,
            _ => {}
        }
    };

    assert_eq!(record.status, CommandStatus::Completed);
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(record.command, "/status --brief");
    assert!(record.stdout.contains("/status --brief"));

    // The log entry may trail the final status by one throttle window.
    if !saw_log {
        client
            .recv_until(|n| matches!(n, Notification::LogEntryStream { .. }))
            .await;
    }

    client.send(&Request::get_command_history()).await;
    let history = client
        .recv_until(|n| {
            matches!(
                n,
                Notification::CommandStatusUpdate {
                    update: CommandStatusPayload::Batch(_)
                }
            )
        })
        .await;
    match history {
        Notification::CommandStatusUpdate {
            update: CommandStatusPayload::Batch(records),
        } => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].command_id, record.command_id);
        }
        other => panic!("Expected history, got {other:?}"),
    }

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_invalid_command_reports_failure() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client.send(&Request::execute("no-slash", Vec::new())).await;
    let msg = client
        .recv_until(|n| {
            matches!(
                n,
                Notification::CommandStatusUpdate {
                    update: CommandStatusPayload::Single(r)
                } if r.status.is_terminal()
            )
        })
        .await;
    let Notification::CommandStatusUpdate {
        update: CommandStatusPayload::Single(record),
    } = msg
    else {
        unreachable!()
    };
    assert_eq!(record.status, CommandStatus::Failed);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_cancel_without_running_command() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client.send(&Request::cancel(None)).await;
    match client
        .recv_until(|n| matches!(n, Notification::Error { .. }))
        .await
    {
        Notification::Error { code, .. } => assert_eq!(code.as_deref(), Some(NO_RUNNING_COMMAND)),
        other => panic!("Expected error, got {other:?}"),
    }

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_init_command_reports_progress() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client
        .send(&Request::execute(INIT_PROJECT_COMMAND, Vec::new()))
        .await;
    client
        .recv_until(|n| matches!(n, Notification::InitProgressUpdate { .. }))
        .await;

    daemon.write(paths::README, &format!("# Demo\n\n{LONG_TEXT}\n"));
    daemon.write(
        paths::EPICS,
        &format!("## Epic #1: Setup [active]\n{LONG_TEXT}\n"),
    );
    daemon.write(paths::ROADMAP, &format!("# Roadmap\n\n{LONG_TEXT}\n"));

    let done = client
        .recv_until(|n| {
            matches!(n, Notification::InitProgressUpdate { status, .. } if status == "succeeded")
        })
        .await;
    match done {
        Notification::InitProgressUpdate { progress, logs, .. } => {
            assert_eq!(progress, 100);
            assert!(!logs.is_empty());
        }
        other => panic!("Expected init progress, got {other:?}"),
    }

    daemon.shutdown().await;
}

// ============================================================================
// Protocol Tests
// ============================================================================

#[tokio::test]
async fn test_malformed_request_keeps_connection() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client.send_raw("this is not json").await;
    match client.recv_until(|n| matches!(n, Notification::Error { .. })).await {
        Notification::Error { code, .. } => assert_eq!(code.as_deref(), Some(BAD_REQUEST)),
        other => panic!("Expected error, got {other:?}"),
    }

    client.send_raw(r#"{"kind":"launch-rockets"}"#).await;
    match client.recv_until(|n| matches!(n, Notification::Error { .. })).await {
        Notification::Error { message, .. } => assert!(message.contains("launch-rockets")),
        other => panic!("Expected error, got {other:?}"),
    }

    // Still serving.
    client.send(&Request::get_project_state()).await;
    client
        .recv_until(|n| matches!(n, Notification::StateUpdate { .. }))
        .await;

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_incompatible_version_rejected() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    let mut request = Request::get_project_state();
    request.protocol_version = ProtocolVersion::new(99, 0);
    client.send(&request).await;

    match client.recv_until(|n| matches!(n, Notification::Error { .. })).await {
        Notification::Error { code, .. } => {
            assert_eq!(code.as_deref(), Some(INCOMPATIBLE_VERSION));
        }
        other => panic!("Expected error, got {other:?}"),
    }

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_multiple_clients_see_same_events() {
    let daemon = TestDaemon::spawn().await;
    let mut first = daemon.connect().await;
    let mut second = daemon.connect().await;

    first.send(&Request::execute("/hello", Vec::new())).await;

    for client in [&mut first, &mut second] {
        client
            .recv_until(|n| {
                matches!(
                    n,
                    Notification::CommandStatusUpdate {
                        update: CommandStatusPayload::Single(r)
                    } if r.status == CommandStatus::Completed
                )
            })
            .await;
    }

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let daemon = TestDaemon::spawn().await;
    let socket = daemon.socket_path.clone();
    let _client = daemon.connect().await;

    daemon.shutdown().await;
    assert!(!socket.exists());
}
