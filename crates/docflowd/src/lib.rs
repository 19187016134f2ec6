//! docflow daemon - project state, event bus and command bridge
//!
//! This crate provides the daemon side of docflow:
//! - `state` - project state from the workflow documents, initialization
//!   polling, structure validation and file watches
//! - `bus` - typed, synchronous event bus with bounded history
//! - `bridge` - runs slash commands in a reusable terminal session
//! - `runlog` - actor owning the command execution records
//! - `throttle` - keyed debouncer and log stream throttler
//! - `server` - Unix socket server for rendering surfaces
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          docflowd daemon                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  notify watches ──▶ StateRefresher ──▶ ProjectSnapshot           │
//! │                            │                                     │
//! │                            ▼ PROJECT_STATE_CHANGED               │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │ Bridge       │──▶│StateEventBus │──▶│ ConnectionHandler    │  │
//! │  │ (terminal)   │   │ (history 100)│   │ (per client,         │  │
//! │  └──────┬───────┘   └──────────────┘   │  log throttler)      │  │
//! │         │ output            ▲          └──────────┬───────────┘  │
//! │         ▼                   │                     │              │
//! │  ┌──────────────┐           │             DaemonServer           │
//! │  │ RunLogActor  │───────────┘             (Unix socket)          │
//! │  └──────────────┘  LOG_ENTRY_ADDED, COMMAND_PROGRESS             │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate never panics:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod bridge;
pub mod bus;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod runlog;
pub mod server;
pub mod state;
pub mod throttle;
