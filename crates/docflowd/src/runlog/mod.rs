//! Command run log using the actor pattern.
//!
//! The run log exclusively owns [`CommandExecutionRecord`]s. The bridge
//! creates and finishes records and streams output into them through a
//! [`RunLogHandle`]; readers get clones.
//!
//! ```text
//! ┌──────────────┐  RunLogCommand   ┌──────────────┐  LOG_ENTRY_ADDED    ┌──────────────┐
//! │    Bridge    │─────────────────▶│ RunLogActor  │────────────────────▶│StateEventBus │
//! └──────────────┘  (mpsc channel)  └──────────────┘  COMMAND_PROGRESS   └──────────────┘
//!                                                     (debounced 200ms)
//! ```
//!
//! [`CommandExecutionRecord`]: docflow_core::CommandExecutionRecord

use std::time::Duration;

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::RunLogActor;
pub use commands::{RunLogCommand, RunLogError};
pub use handle::RunLogHandle;

use crate::bus::StateEventBus;
use crate::throttle::{KeyedDebouncer, RECORD_REFRESH_WINDOW};

const COMMAND_BUFFER: usize = 256;

/// Spawns the run log actor with the default refresh window.
pub fn spawn_run_log(bus: StateEventBus) -> RunLogHandle {
    spawn_run_log_with_window(bus, RECORD_REFRESH_WINDOW)
}

pub fn spawn_run_log_with_window(bus: StateEventBus, refresh_window: Duration) -> RunLogHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let actor = RunLogActor::new(cmd_rx, bus, KeyedDebouncer::new(refresh_window));
    tokio::spawn(actor.run());
    RunLogHandle::new(cmd_tx)
}
