//! Client interface for the run log actor.

use docflow_core::{CommandExecutionRecord, CommandId, CommandStatus};
use docflow_term::OutputChunk;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use super::commands::{RunLogCommand, RunLogError};

/// Cheap-to-clone handle to the run log actor.
#[derive(Clone)]
pub struct RunLogHandle {
    sender: mpsc::Sender<RunLogCommand>,
}

impl RunLogHandle {
    pub fn new(sender: mpsc::Sender<RunLogCommand>) -> Self {
        Self { sender }
    }

    /// Registers a new running record.
    ///
    /// # Errors
    ///
    /// `RunLogError::ChannelClosed` if the actor has shut down.
    pub async fn start(
        &self,
        command_id: CommandId,
        command: impl Into<String>,
    ) -> Result<CommandExecutionRecord, RunLogError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RunLogCommand::Start {
                command_id,
                command: command.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RunLogError::ChannelClosed)?;
        rx.await.map_err(|_| RunLogError::ChannelClosed)
    }

    /// Forwards an output chunk. Fire-and-forget.
    pub async fn append_output(&self, command_id: CommandId, chunk: OutputChunk) {
        if self
            .sender
            .send(RunLogCommand::AppendOutput { command_id, chunk })
            .await
            .is_err()
        {
            trace!("Run log closed, output dropped");
        }
    }

    /// Moves a record to a terminal status and returns it.
    ///
    /// # Errors
    ///
    /// - `RunLogError::UnknownCommand` if the record does not exist
    /// - `RunLogError::ChannelClosed` if the actor has shut down
    pub async fn finish(
        &self,
        command_id: CommandId,
        status: CommandStatus,
        exit_code: Option<i32>,
    ) -> Result<CommandExecutionRecord, RunLogError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RunLogCommand::Finish {
                command_id,
                status,
                exit_code,
                respond_to: tx,
            })
            .await
            .map_err(|_| RunLogError::ChannelClosed)?;
        rx.await.map_err(|_| RunLogError::ChannelClosed)?
    }

    /// Returns `None` if the record doesn't exist or the actor is gone.
    pub async fn get(&self, command_id: CommandId) -> Option<CommandExecutionRecord> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RunLogCommand::Get {
                command_id,
                respond_to: tx,
            })
            .await
            .ok()?;
        rx.await.ok()?
    }

    /// Returns an empty vector if the actor is gone.
    pub async fn history(&self) -> Vec<CommandExecutionRecord> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RunLogCommand::History { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn running(&self) -> Option<CommandId> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RunLogCommand::Running { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()?
    }
}
