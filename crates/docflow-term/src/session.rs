//! Session and launcher traits shared by the tmux and shell backends.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::OutputStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::TerminalResult;

/// Capacity of each session's output broadcast channel.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// One line of session output, including its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub data: String,
}

impl OutputChunk {
    pub fn stdout(data: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            data: data.into(),
        }
    }
}

/// A long-lived terminal that accepts input lines.
///
/// Output from every command sent to the session is published on a
/// broadcast channel; subscribe before sending to see all of it.
#[async_trait]
pub trait TerminalSession: Send + Sync {
    fn name(&self) -> &str;

    /// False once the underlying shell or tmux session has exited.
    async fn is_alive(&self) -> bool;

    /// Types `line` into the session followed by Enter.
    async fn send_line(&self, line: &str) -> TerminalResult<()>;

    /// Sends an interrupt (Ctrl-C) to whatever is running in the session.
    async fn interrupt(&self) -> TerminalResult<()>;

    fn subscribe_output(&self) -> broadcast::Receiver<OutputChunk>;

    async fn close(&self) -> TerminalResult<()>;
}

/// Creates terminal sessions rooted at a working directory.
#[async_trait]
pub trait TerminalLauncher: Send + Sync {
    async fn launch(&self, name: &str, cwd: &Path) -> TerminalResult<Arc<dyn TerminalSession>>;
}

/// Which backend the daemon launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LauncherKind {
    #[default]
    Tmux,
    Shell,
}

/// Wraps `arg` in single quotes for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/status"), "'/status'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_output_chunk_constructors() {
        assert_eq!(OutputChunk::stdout("a\n").stream, OutputStream::Stdout);
        assert_eq!(OutputChunk::stderr("b\n").stream, OutputStream::Stderr);
        assert_eq!(LauncherKind::default(), LauncherKind::Tmux);
    }
}
