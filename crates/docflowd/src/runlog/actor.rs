//! Run log actor - owns every command execution record.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored; the caller may have gone away

use std::collections::{HashMap, VecDeque};

use docflow_core::{
    CommandExecutionRecord, CommandId, CommandStatus, LogEntry, MAX_COMMAND_HISTORY,
};
use docflow_term::OutputChunk;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::commands::{RunLogCommand, RunLogError};
use crate::bus::{EventPayload, StateEventBus};
use crate::throttle::KeyedDebouncer;

/// The run log actor.
///
/// Processes commands sequentially in a single task. Every output chunk is
/// appended to its record immediately and forwarded to the bus as
/// LOG_ENTRY_ADDED; the record's COMMAND_PROGRESS refresh is debounced.
pub struct RunLogActor {
    receiver: mpsc::Receiver<RunLogCommand>,
    /// Oldest first, at most [`MAX_COMMAND_HISTORY`].
    records: VecDeque<CommandExecutionRecord>,
    /// Next stream index per record.
    line_counters: HashMap<CommandId, u64>,
    bus: StateEventBus,
    refresh: KeyedDebouncer<CommandId>,
}

impl RunLogActor {
    pub fn new(
        receiver: mpsc::Receiver<RunLogCommand>,
        bus: StateEventBus,
        refresh: KeyedDebouncer<CommandId>,
    ) -> Self {
        Self {
            receiver,
            records: VecDeque::with_capacity(MAX_COMMAND_HISTORY),
            line_counters: HashMap::new(),
            bus,
            refresh,
        }
    }

    pub async fn run(mut self) {
        info!("Run log actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(records = self.records.len(), "Run log actor stopped");
    }

    fn handle_command(&mut self, cmd: RunLogCommand) {
        match cmd {
            RunLogCommand::Start {
                command_id,
                command,
                respond_to,
            } => {
                let record = self.handle_start(command_id, command);
                let _ = respond_to.send(record);
            }
            RunLogCommand::AppendOutput { command_id, chunk } => {
                self.handle_append(&command_id, &chunk);
            }
            RunLogCommand::Finish {
                command_id,
                status,
                exit_code,
                respond_to,
            } => {
                let result = self.handle_finish(&command_id, status, exit_code);
                let _ = respond_to.send(result);
            }
            RunLogCommand::Get {
                command_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.record(&command_id).cloned());
            }
            RunLogCommand::History { respond_to } => {
                let _ = respond_to.send(self.records.iter().cloned().collect());
            }
            RunLogCommand::Running { respond_to } => {
                let running = self
                    .records
                    .iter()
                    .rev()
                    .find(|r| r.is_running())
                    .map(|r| r.command_id.clone());
                let _ = respond_to.send(running);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_start(&mut self, command_id: CommandId, command: String) -> CommandExecutionRecord {
        while self.records.len() >= MAX_COMMAND_HISTORY {
            if let Some(evicted) = self.records.pop_front() {
                self.line_counters.remove(&evicted.command_id);
                self.refresh.cancel(&evicted.command_id);
                debug!(command_id = %evicted.command_id, "Evicted oldest command record");
            }
        }

        let record = CommandExecutionRecord::new(command_id.clone(), command);
        self.records.push_back(record.clone());
        self.line_counters.insert(command_id.clone(), 0);
        debug!(command_id = %command_id, total = self.records.len(), "Command record created");
        record
    }

    fn handle_append(&mut self, command_id: &CommandId, chunk: &OutputChunk) {
        let Some(record) = self
            .records
            .iter_mut()
            .find(|r| &r.command_id == command_id)
        else {
            debug!(command_id = %command_id, "Output for unknown command dropped");
            return;
        };
        record.append(chunk.stream, &chunk.data);

        let counter = self.line_counters.entry(command_id.clone()).or_insert(0);
        for line in chunk.data.lines().filter(|l| !l.trim().is_empty()) {
            let entry = LogEntry::from_output_line(line, chunk.stream, command_id, *counter);
            *counter = counter.saturating_add(1);
            self.bus.emit(EventPayload::LogEntryAdded { entry });
        }

        let bus = self.bus.clone();
        let id = command_id.clone();
        self.refresh.schedule(command_id.clone(), move || {
            bus.emit(EventPayload::CommandProgress { command_id: id });
        });
    }

    fn handle_finish(
        &mut self,
        command_id: &CommandId,
        status: CommandStatus,
        exit_code: Option<i32>,
    ) -> Result<CommandExecutionRecord, RunLogError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| &r.command_id == command_id)
            .ok_or_else(|| RunLogError::UnknownCommand(command_id.clone()))?;
        record.finish(status, exit_code);
        info!(
            command_id = %command_id,
            status = %record.status,
            duration_ms = record.duration_ms.unwrap_or_default(),
            "Command finished"
        );
        Ok(record.clone())
    }

    fn record(&self, command_id: &CommandId) -> Option<&CommandExecutionRecord> {
        self.records.iter().find(|r| &r.command_id == command_id)
    }
}
