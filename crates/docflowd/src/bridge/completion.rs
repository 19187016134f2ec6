//! Strategies for deciding when a command sent to a terminal has finished.
//!
//! The terminal gives the bridge no structured exit signal, so completion
//! is inferred:
//!
//! - [`TimeoutHeuristic`] assumes success once a fixed time has passed
//!   without cancellation. It never observes the real exit status.
//! - [`ExitMarkerDetector`] appends an `echo` of `$?` behind a marker to the
//!   command line and watches the output for it.
//! - [`SentinelFileDetector`] has the shell write `$?` to a file and polls
//!   for that file.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use docflow_core::CommandId;
use docflow_term::{shell_quote, OutputChunk};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Prefix of the line the exit marker strategy waits for.
pub const EXIT_MARKER: &str = "__DOCFLOW_EXIT__";

/// How a completion wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The command reported this exit code.
    Exited(i32),
    /// No exit status is known; success is assumed.
    AssumedSuccess,
    /// No completion signal arrived in time.
    TimedOut,
    /// The session's output ended before a completion signal.
    OutputClosed,
}

#[async_trait]
pub trait CompletionDetector: Send + Sync {
    /// Rewrites the command line before it is sent.
    async fn prepare(&self, command_line: String, _command_id: &CommandId) -> String {
        command_line
    }

    /// Waits for the command to finish. `output` was subscribed before the
    /// command line was sent.
    async fn wait(
        &self,
        command_id: &CommandId,
        output: &mut broadcast::Receiver<OutputChunk>,
    ) -> Completion;
}

/// Which detector the daemon uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionKind {
    #[default]
    Timeout,
    ExitMarker,
    Sentinel,
}

// ============================================================================
// Timeout Heuristic
// ============================================================================

#[derive(Debug, Clone)]
pub struct TimeoutHeuristic {
    timeout: Duration,
}

impl TimeoutHeuristic {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CompletionDetector for TimeoutHeuristic {
    async fn wait(
        &self,
        _command_id: &CommandId,
        _output: &mut broadcast::Receiver<OutputChunk>,
    ) -> Completion {
        tokio::time::sleep(self.timeout).await;
        Completion::AssumedSuccess
    }
}

// ============================================================================
// Exit Marker
// ============================================================================

/// The line an exit marker produces for `command_id` exiting with `code`.
pub fn exit_marker_line(command_id: &CommandId, code: i32) -> String {
    format!("{EXIT_MARKER}{command_id}:{code}")
}

/// Extracts the exit code if `line` is the marker line for `command_id`.
///
/// The typed command itself (echoed by a terminal) contains the marker
/// followed by a literal `$?`, which does not parse.
pub fn parse_exit_marker(line: &str, command_id: &CommandId) -> Option<i32> {
    let prefix = format!("{EXIT_MARKER}{command_id}:");
    let start = line.find(&prefix)?;
    let rest = line.get(start + prefix.len()..)?;
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().ok()
}

#[derive(Debug, Clone)]
pub struct ExitMarkerDetector {
    timeout: Duration,
}

impl ExitMarkerDetector {
    /// Gives up with [`Completion::TimedOut`] after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CompletionDetector for ExitMarkerDetector {
    async fn prepare(&self, command_line: String, command_id: &CommandId) -> String {
        format!("{command_line}; echo \"{EXIT_MARKER}{command_id}:$?\"")
    }

    async fn wait(
        &self,
        command_id: &CommandId,
        output: &mut broadcast::Receiver<OutputChunk>,
    ) -> Completion {
        let watch = async {
            loop {
                match output.recv().await {
                    Ok(chunk) => {
                        if let Some(code) = chunk
                            .data
                            .lines()
                            .find_map(|line| parse_exit_marker(line, command_id))
                        {
                            return Completion::Exited(code);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(command_id = %command_id, skipped, "Exit marker watch lagged");
                    }
                    Err(RecvError::Closed) => return Completion::OutputClosed,
                }
            }
        };

        tokio::time::timeout(self.timeout, watch)
            .await
            .unwrap_or(Completion::TimedOut)
    }
}

// ============================================================================
// Sentinel File
// ============================================================================

#[derive(Debug, Clone)]
pub struct SentinelFileDetector {
    path: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
}

impl SentinelFileDetector {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            timeout,
        }
    }
}

#[async_trait]
impl CompletionDetector for SentinelFileDetector {
    async fn prepare(&self, command_line: String, _command_id: &CommandId) -> String {
        // A stale sentinel from the previous command would end the wait early.
        let _ = tokio::fs::remove_file(&self.path).await;
        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                debug!(error = %e, path = %parent.display(), "Could not create sentinel directory");
            }
        }
        format!(
            "{command_line}; echo $? > {}",
            shell_quote(&self.path.to_string_lossy())
        )
    }

    async fn wait(
        &self,
        command_id: &CommandId,
        _output: &mut broadcast::Receiver<OutputChunk>,
    ) -> Completion {
        let poll = async {
            loop {
                if let Ok(text) = tokio::fs::read_to_string(&self.path).await {
                    if let Ok(code) = text.trim().parse::<i32>() {
                        debug!(command_id = %command_id, code, "Sentinel file found");
                        return Completion::Exited(code);
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::time::timeout(self.timeout, poll)
            .await
            .unwrap_or(Completion::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exit_marker() {
        let id = CommandId::new("cmd-5-1");
        assert_eq!(parse_exit_marker(&exit_marker_line(&id, 0), &id), Some(0));
        assert_eq!(parse_exit_marker("  __DOCFLOW_EXIT__cmd-5-1:127\r", &id), Some(127));
        // The echoed command line itself.
        assert_eq!(
            parse_exit_marker("claude '/x'; echo \"__DOCFLOW_EXIT__cmd-5-1:$?\"", &id),
            None
        );
        // Another command's marker.
        assert_eq!(parse_exit_marker("__DOCFLOW_EXIT__cmd-5-10:0", &id), None);
    }

    #[tokio::test]
    async fn test_exit_marker_detector_reads_code() {
        let id = CommandId::new("cmd-1-0");
        let detector = ExitMarkerDetector::new(Duration::from_secs(5));
        let prepared = detector.prepare("claude '/x'".to_string(), &id).await;
        assert!(prepared.starts_with("claude '/x'; echo"));

        let (tx, mut rx) = broadcast::channel(16);
        tx.send(OutputChunk::stdout("working\n")).unwrap();
        tx.send(OutputChunk::stdout(format!("{}\n", exit_marker_line(&id, 2))))
            .unwrap();
        assert_eq!(detector.wait(&id, &mut rx).await, Completion::Exited(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_marker_detector_times_out() {
        let id = CommandId::new("cmd-1-0");
        let detector = ExitMarkerDetector::new(Duration::from_millis(100));
        let (_tx, mut rx) = broadcast::channel::<OutputChunk>(16);
        assert_eq!(detector.wait(&id, &mut rx).await, Completion::TimedOut);
    }

    #[tokio::test]
    async fn test_exit_marker_detector_output_closed() {
        let id = CommandId::new("cmd-1-0");
        let detector = ExitMarkerDetector::new(Duration::from_secs(5));
        let (tx, mut rx) = broadcast::channel::<OutputChunk>(16);
        drop(tx);
        assert_eq!(detector.wait(&id, &mut rx).await, Completion::OutputClosed);
    }

    #[tokio::test]
    async fn test_sentinel_detector_polls_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("last-exit");
        let detector = SentinelFileDetector::new(
            &path,
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        let id = CommandId::new("cmd-2-0");

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale").unwrap();
        let line = detector.prepare("claude '/x'".to_string(), &id).await;
        assert!(!path.exists());
        assert!(line.ends_with("last-exit'"));

        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tokio::fs::write(writer_path, "3\n").await.unwrap();
        });
        let (_tx, mut rx) = broadcast::channel::<OutputChunk>(4);
        assert_eq!(detector.wait(&id, &mut rx).await, Completion::Exited(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_heuristic_assumes_success() {
        let detector = TimeoutHeuristic::new(Duration::from_secs(30));
        let (_tx, mut rx) = broadcast::channel::<OutputChunk>(4);
        let start = tokio::time::Instant::now();
        let result = detector.wait(&CommandId::new("c"), &mut rx).await;
        assert_eq!(result, Completion::AssumedSuccess);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
