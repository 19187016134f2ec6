//! docflow core - shared types for markdown-driven project workflows
//!
//! This crate provides the domain types shared between the daemon
//! (docflowd) and its clients: the epic/story/ticket model, the markdown
//! entity parser, log entries and command execution records.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod command;
pub mod error;
pub mod log;
pub mod model;
pub mod parser;
pub mod paths;
pub mod theme;

// Re-exports for convenience
pub use command::{
    CommandExecutionRecord, CommandId, CommandStatus, SlashCommand, INIT_PROJECT_COMMAND,
    MAX_COMMAND_HISTORY,
};
pub use error::{DomainError, DomainResult, ParseError, ParseResult};
pub use log::{LogBuffer, LogEntry, LogLevel, OutputStream, MAX_LOG_ENTRIES};
pub use model::{EntityStatus, Epic, Priority, ProjectState, Story, Ticket, TicketStatus};
pub use parser::{
    parse_epic_detail, parse_epic_list, parse_status, parse_story_list, parse_title,
};
pub use theme::ThemeKind;
