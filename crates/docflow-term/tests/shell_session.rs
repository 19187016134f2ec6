//! Shell sessions driven through the launcher trait objects, the way the
//! daemon's bridge uses them.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::OutputStream;
use docflow_term::{OutputChunk, ShellLauncher, TerminalError, TerminalLauncher, TerminalSession};
use tokio::sync::broadcast;
use tokio::time::timeout;

async fn launch() -> (tempfile::TempDir, Arc<dyn TerminalSession>) {
    let dir = tempfile::tempdir().unwrap();
    let launcher: Arc<dyn TerminalLauncher> = Arc::new(ShellLauncher::default());
    let session = launcher.launch("test", dir.path()).await.unwrap();
    (dir, session)
}

async fn next_chunk(rx: &mut broadcast::Receiver<OutputChunk>) -> OutputChunk {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("output within timeout")
        .unwrap()
}

#[tokio::test]
async fn test_stderr_is_tagged() {
    let (_dir, session) = launch().await;
    let mut rx = session.subscribe_output();

    session.send_line("echo oops 1>&2").await.unwrap();
    let chunk = next_chunk(&mut rx).await;
    assert_eq!(chunk.stream, OutputStream::Stderr);
    assert_eq!(chunk.data, "oops\n");

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_session_is_reused_across_commands() {
    let (_dir, session) = launch().await;
    let mut rx = session.subscribe_output();

    session.send_line("X=kept").await.unwrap();
    session.send_line("echo $X").await.unwrap();
    assert_eq!(next_chunk(&mut rx).await.data, "kept\n");

    session.send_line("echo second").await.unwrap();
    assert_eq!(next_chunk(&mut rx).await.data, "second\n");

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_utf8_does_not_end_output() {
    let (_dir, session) = launch().await;
    let mut rx = session.subscribe_output();

    session.send_line("printf 'bad \\377 byte\\n'").await.unwrap();
    assert_eq!(next_chunk(&mut rx).await.data, "bad \u{FFFD} byte\n");

    session.send_line("echo after").await.unwrap();
    assert_eq!(next_chunk(&mut rx).await.data, "after\n");
    assert!(session.is_alive().await);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_session_rejects_input() {
    let (_dir, session) = launch().await;
    assert!(session.is_alive().await);

    session.close().await.unwrap();
    // kill() reaps the child, so the exit is visible immediately.
    assert!(!session.is_alive().await);
    assert!(matches!(
        session.send_line("echo late").await,
        Err(TerminalError::Closed(_))
    ));
}

#[tokio::test]
async fn test_exit_is_detected() {
    let (_dir, session) = launch().await;
    session.send_line("exit 3").await.unwrap();

    let mut alive = true;
    for _ in 0..50 {
        if !session.is_alive().await {
            alive = false;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!alive, "session should report the shell exit");
}
