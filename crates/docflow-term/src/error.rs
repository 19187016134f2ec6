//! Terminal session errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    /// The session process could not be started.
    #[error("failed to launch terminal session: {0}")]
    Launch(#[source] std::io::Error),

    /// A tmux invocation exited unsuccessfully.
    #[error("tmux {command} failed: {stderr}")]
    Tmux { command: String, stderr: String },

    #[error("invalid session name: {0:?}")]
    InvalidSessionName(String),

    /// The session exited or was closed.
    #[error("terminal session {0} is closed")]
    Closed(String),

    #[error("failed to signal terminal session: {0}")]
    Signal(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type TerminalResult<T> = Result<T, TerminalError>;
