//! Tmux-backed terminal sessions.
//!
//! The session is a detached tmux session the user can attach to and watch.
//! Pane output is captured with `pipe-pane` into a log file that a
//! background task tails onto the output channel.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Tmux command failures are returned as errors

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::{TerminalError, TerminalResult};
use crate::session::{
    shell_quote, OutputChunk, TerminalLauncher, TerminalSession, OUTPUT_CHANNEL_CAPACITY,
};

/// How often the pane log is checked for new output.
const TAIL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Helpers
// ============================================================================

/// Session names may not contain characters tmux treats as target syntax.
#[must_use]
pub fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Default directory for pane logs: `$XDG_STATE_HOME/docflow`.
pub fn default_log_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("docflow")
}

async fn tmux(args: &[&str]) -> TerminalResult<String> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .await
        .map_err(TerminalError::Launch)?;

    if !output.status.success() {
        return Err(TerminalError::Tmux {
            command: args.first().copied().unwrap_or_default().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn has_session(name: &str) -> bool {
    tmux(&["has-session", "-t", name]).await.is_ok()
}

// ============================================================================
// Launcher
// ============================================================================

#[derive(Debug, Clone)]
pub struct TmuxLauncher {
    log_dir: PathBuf,
}

impl TmuxLauncher {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }
}

impl Default for TmuxLauncher {
    fn default() -> Self {
        Self::new(default_log_dir())
    }
}

#[async_trait]
impl TerminalLauncher for TmuxLauncher {
    async fn launch(&self, name: &str, cwd: &Path) -> TerminalResult<Arc<dyn TerminalSession>> {
        if !is_valid_session_name(name) {
            return Err(TerminalError::InvalidSessionName(name.to_string()));
        }

        if has_session(name).await {
            debug!(session = name, "Reusing existing tmux session");
        } else {
            let cwd = cwd.to_string_lossy();
            tmux(&["new-session", "-d", "-s", name, "-c", &cwd]).await?;
            info!(session = name, cwd = %cwd, "Created tmux session");
        }

        tokio::fs::create_dir_all(&self.log_dir).await?;
        let log_path = self.log_dir.join(format!("tmux-{name}.log"));
        // Start from an empty log so old output is never replayed.
        tokio::fs::write(&log_path, b"").await?;

        let pipe = format!("cat >> {}", shell_quote(&log_path.to_string_lossy()));
        // Toggle off any previous pipe, then attach ours.
        let _ = tmux(&["pipe-pane", "-t", name]).await;
        tmux(&["pipe-pane", "-t", name, &pipe]).await?;

        Ok(Arc::new(TmuxSession::start(name, log_path)))
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct TmuxSession {
    name: String,
    output: broadcast::Sender<OutputChunk>,
    tail: JoinHandle<()>,
}

impl TmuxSession {
    fn start(name: &str, log_path: PathBuf) -> Self {
        let (output, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let tail = tokio::spawn(tail_log(log_path, output.clone()));
        Self {
            name: name.to_string(),
            output,
            tail,
        }
    }
}

/// Follows `path`, publishing each complete line.
async fn tail_log(path: PathBuf, output: broadcast::Sender<OutputChunk>) {
    let mut offset: u64 = 0;
    let mut partial: Vec<u8> = Vec::new();
    let mut ticker = tokio::time::interval(TAIL_INTERVAL);

    loop {
        ticker.tick().await;

        let Ok(mut file) = tokio::fs::File::open(&path).await else {
            continue;
        };
        let Ok(len) = file.metadata().await.map(|m| m.len()) else {
            continue;
        };
        if len < offset {
            // Truncated underneath us.
            offset = 0;
            partial.clear();
        }
        if len == offset || file.seek(SeekFrom::Start(offset)).await.is_err() {
            continue;
        }

        let mut buf = Vec::new();
        let Ok(read) = file.read_to_end(&mut buf).await else {
            continue;
        };
        offset = offset.saturating_add(read as u64);
        partial.extend_from_slice(&buf);

        for line in drain_lines(&mut partial) {
            trace!(line = line.trim_end(), "tmux pane output");
            let _ = output.send(OutputChunk::stdout(line));
        }
    }
}

/// Removes every complete line from `partial`, decoding each one on its
/// own so a character split across reads survives intact.
fn drain_lines(partial: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = partial.iter().position(|b| *b == b'\n') {
        let raw: Vec<u8> = partial.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&raw).replace('\r', ""));
    }
    lines
}

#[async_trait]
impl TerminalSession for TmuxSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_alive(&self) -> bool {
        has_session(&self.name).await
    }

    async fn send_line(&self, line: &str) -> TerminalResult<()> {
        if !has_session(&self.name).await {
            return Err(TerminalError::Closed(self.name.clone()));
        }
        tmux(&["send-keys", "-t", &self.name, "-l", line]).await?;
        tmux(&["send-keys", "-t", &self.name, "Enter"]).await?;
        Ok(())
    }

    async fn interrupt(&self) -> TerminalResult<()> {
        tmux(&["send-keys", "-t", &self.name, "C-c"]).await?;
        debug!(session = %self.name, "Sent C-c to tmux session");
        Ok(())
    }

    fn subscribe_output(&self) -> broadcast::Receiver<OutputChunk> {
        self.output.subscribe()
    }

    async fn close(&self) -> TerminalResult<()> {
        self.tail.abort();
        if has_session(&self.name).await {
            tmux(&["kill-session", "-t", &self.name]).await?;
        }
        Ok(())
    }
}

impl Drop for TmuxSession {
    fn drop(&mut self) {
        self.tail.abort();
    }
}
