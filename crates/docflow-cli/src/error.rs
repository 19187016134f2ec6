//! Error types for the docflow client.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::io;
use std::path::PathBuf;

use docflow_protocol::ProtocolError;
use thiserror::Error;

// ============================================================================
// CLI Error Type
// ============================================================================

/// Errors surfaced by `docflow` subcommands.
///
/// Connection errors carry the socket path so the message can point the
/// user at `docflowd start`.
#[derive(Error, Debug)]
pub enum CliError {
    /// The daemon socket could not be reached.
    #[error("Failed to connect to daemon at {path}: {reason} (is `docflowd start` running?)")]
    DaemonConnection { path: PathBuf, reason: String },

    /// The daemon closed the connection before answering.
    #[error("Daemon closed the connection")]
    ConnectionClosed,

    /// The daemon answered with an `error` notification.
    #[error("Daemon error{}: {message}", code_suffix(.code))]
    Daemon {
        message: String,
        code: Option<String>,
    },

    /// The daemon speaks an incompatible protocol.
    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    /// The daemon sent something other than what the request expects.
    #[error("Unexpected message from daemon: {0}")]
    Unexpected(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, CliError>;
