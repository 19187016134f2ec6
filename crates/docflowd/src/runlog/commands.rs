//! Run log actor commands and errors.

use docflow_core::{CommandExecutionRecord, CommandId, CommandStatus};
use docflow_term::OutputChunk;
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Run Log Commands
// ============================================================================

/// Commands sent to the run log actor.
///
/// Commands that carry a `respond_to` channel are request/response; the
/// rest are fire-and-forget.
#[derive(Debug)]
pub enum RunLogCommand {
    /// Create a running record. Evicts the oldest record beyond the cap.
    Start {
        command_id: CommandId,
        command: String,
        respond_to: oneshot::Sender<CommandExecutionRecord>,
    },

    /// Append output to a record and forward it as log entries.
    AppendOutput {
        command_id: CommandId,
        chunk: OutputChunk,
    },

    /// Move a record to a terminal status.
    ///
    /// # Errors
    /// - `RunLogError::UnknownCommand` if the record was never started or
    ///   has been evicted
    Finish {
        command_id: CommandId,
        status: CommandStatus,
        exit_code: Option<i32>,
        respond_to: oneshot::Sender<Result<CommandExecutionRecord, RunLogError>>,
    },

    Get {
        command_id: CommandId,
        respond_to: oneshot::Sender<Option<CommandExecutionRecord>>,
    },

    /// All retained records, oldest first.
    History {
        respond_to: oneshot::Sender<Vec<CommandExecutionRecord>>,
    },

    /// The most recently started record still running.
    Running {
        respond_to: oneshot::Sender<Option<CommandId>>,
    },
}

// ============================================================================
// Run Log Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunLogError {
    #[error("unknown command: {0}")]
    UnknownCommand(CommandId),

    /// The actor has shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_error_display() {
        let err = RunLogError::UnknownCommand(CommandId::new("cmd-1-0"));
        assert_eq!(err.to_string(), "unknown command: cmd-1-0");
        assert_eq!(RunLogError::ChannelClosed.to_string(), "response channel closed");
    }
}
