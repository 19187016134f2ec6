//! Envelope, request and notification types.
//!
//! Every message on the wire is a flat JSON object:
//!
//! ```json
//! {"id":"msg-1718000000000-0","kind":"execute-command","timestamp":1718000000000,
//!  "protocol_version":{"major":1,"minor":0},"command":"/status","args":[]}
//! ```
//!
//! Requests flow from a rendering surface to the daemon, notifications flow
//! back. Notifications are broadcasts: nothing correlates them with the
//! request that caused them.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use docflow_core::{
    CommandExecutionRecord, CommandId, LogEntry, ProjectState, ThemeKind,
};
use serde::{Deserialize, Serialize};

use crate::version::ProtocolVersion;

static MESSAGE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generates a message id of the form `msg-{unix millis}-{sequence}`.
pub fn next_message_id() -> String {
    let seq = MESSAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("msg-{}-{seq}", Utc::now().timestamp_millis())
}

// ============================================================================
// Envelope
// ============================================================================

/// Common header carried by every message, with the kind-specific body
/// flattened alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    /// Wraps `body`, filling in a fresh id, the current time and the
    /// current protocol version.
    pub fn new(body: T) -> Self {
        Self {
            id: next_message_id(),
            timestamp: Utc::now().timestamp_millis(),
            protocol_version: ProtocolVersion::CURRENT,
            body,
        }
    }
}

pub type RequestEnvelope = Envelope<Request>;
pub type NotificationEnvelope = Envelope<Notification>;

// ============================================================================
// Requests (surface -> daemon)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Request {
    /// Run a slash command through the external CLI.
    ExecuteCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },

    GetProjectState,

    GetCommandHistory,

    /// Cancel the running command, or a specific one.
    CancelCommand {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_id: Option<CommandId>,
    },

    SelectEpic { epic_id: String },

    SelectStory { story_id: String },
}

impl Request {
    /// The wire name of this request's kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecuteCommand { .. } => EXECUTE_COMMAND,
            Self::GetProjectState => GET_PROJECT_STATE,
            Self::GetCommandHistory => GET_COMMAND_HISTORY,
            Self::CancelCommand { .. } => CANCEL_COMMAND,
            Self::SelectEpic { .. } => SELECT_EPIC,
            Self::SelectStory { .. } => SELECT_STORY,
        }
    }

    pub fn execute(command: impl Into<String>, args: Vec<String>) -> RequestEnvelope {
        Envelope::new(Self::ExecuteCommand {
            command: command.into(),
            args,
        })
    }

    pub fn get_project_state() -> RequestEnvelope {
        Envelope::new(Self::GetProjectState)
    }

    pub fn get_command_history() -> RequestEnvelope {
        Envelope::new(Self::GetCommandHistory)
    }

    pub fn cancel(command_id: Option<CommandId>) -> RequestEnvelope {
        Envelope::new(Self::CancelCommand { command_id })
    }
}

pub const EXECUTE_COMMAND: &str = "execute-command";
pub const GET_PROJECT_STATE: &str = "get-project-state";
pub const GET_COMMAND_HISTORY: &str = "get-command-history";
pub const CANCEL_COMMAND: &str = "cancel-command";
pub const SELECT_EPIC: &str = "select-epic";
pub const SELECT_STORY: &str = "select-story";

// ============================================================================
// Notifications (daemon -> surface)
// ============================================================================

/// Either one command's record or the whole visible history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatusPayload {
    Single(CommandExecutionRecord),
    Batch(Vec<CommandExecutionRecord>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Notification {
    /// Full serialized project state.
    StateUpdate { state: ProjectState },

    CommandStatusUpdate { update: CommandStatusPayload },

    /// One log entry and the command that produced it.
    LogEntryStream {
        entry: LogEntry,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_id: Option<CommandId>,
    },

    InitProgressUpdate {
        /// 0..=100
        progress: u8,
        status: String,
        #[serde(default)]
        logs: Vec<LogEntry>,
    },

    ThemeUpdate { theme: ThemeKind },

    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl Notification {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateUpdate { .. } => STATE_UPDATE,
            Self::CommandStatusUpdate { .. } => COMMAND_STATUS_UPDATE,
            Self::LogEntryStream { .. } => LOG_ENTRY_STREAM,
            Self::InitProgressUpdate { .. } => INIT_PROGRESS_UPDATE,
            Self::ThemeUpdate { .. } => THEME_UPDATE,
            Self::Error { .. } => ERROR,
        }
    }

    pub fn state_update(state: ProjectState) -> NotificationEnvelope {
        Envelope::new(Self::StateUpdate { state })
    }

    pub fn command_status(record: CommandExecutionRecord) -> NotificationEnvelope {
        Envelope::new(Self::CommandStatusUpdate {
            update: CommandStatusPayload::Single(record),
        })
    }

    pub fn command_history(records: Vec<CommandExecutionRecord>) -> NotificationEnvelope {
        Envelope::new(Self::CommandStatusUpdate {
            update: CommandStatusPayload::Batch(records),
        })
    }

    pub fn log_entry(entry: LogEntry) -> NotificationEnvelope {
        let command_id = entry.command_id.clone();
        Envelope::new(Self::LogEntryStream { entry, command_id })
    }

    pub fn init_progress(
        progress: u8,
        status: impl Into<String>,
        logs: Vec<LogEntry>,
    ) -> NotificationEnvelope {
        Envelope::new(Self::InitProgressUpdate {
            progress: progress.min(100),
            status: status.into(),
            logs,
        })
    }

    pub fn theme(theme: ThemeKind) -> NotificationEnvelope {
        Envelope::new(Self::ThemeUpdate { theme })
    }

    pub fn error(message: impl Into<String>) -> NotificationEnvelope {
        Envelope::new(Self::Error {
            message: message.into(),
            code: None,
        })
    }

    pub fn error_with_code(message: impl Into<String>, code: &str) -> NotificationEnvelope {
        Envelope::new(Self::Error {
            message: message.into(),
            code: Some(code.to_string()),
        })
    }
}

pub const STATE_UPDATE: &str = "state-update";
pub const COMMAND_STATUS_UPDATE: &str = "command-status-update";
pub const LOG_ENTRY_STREAM: &str = "log-entry-stream";
pub const INIT_PROGRESS_UPDATE: &str = "init-progress-update";
pub const THEME_UPDATE: &str = "theme-update";
pub const ERROR: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::{LogLevel, OutputStream};

    #[test]
    fn test_envelope_fills_header() {
        let a = Request::get_project_state();
        let b = Request::get_project_state();
        assert!(a.id.starts_with("msg-"));
        assert_ne!(a.id, b.id);
        assert!(a.timestamp > 0);
        assert!(a.protocol_version.is_current());
    }

    #[test]
    fn test_request_serialization_is_flat() {
        let msg = Request::execute("/1-project:1-start:1-Init-Project", vec![]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "execute-command");
        assert_eq!(value["command"], "/1-project:1-start:1-Init-Project");
        assert!(value.get("args").is_none());
        assert!(value["id"].is_string());
    }

    #[test]
    fn test_unit_request_parses_without_payload() {
        let json = r#"{"id":"x","kind":"get-command-history","timestamp":1}"#;
        let parsed: RequestEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.body, Request::GetCommandHistory);
        assert!(parsed.protocol_version.is_current());
    }

    #[test]
    fn test_notification_kinds() {
        let msg = Notification::theme(ThemeKind::Light);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "theme-update");
        assert_eq!(value["theme"], "light");
        assert_eq!(msg.body.kind(), THEME_UPDATE);
    }

    #[test]
    fn test_log_entry_stream_carries_command_id() {
        let id = CommandId::new("cmd-9-0");
        let entry = LogEntry::from_output_line("hi", OutputStream::Stdout, &id, 0);
        let msg = Notification::log_entry(entry);
        match msg.body {
            Notification::LogEntryStream { entry, command_id } => {
                assert_eq!(command_id, Some(id));
                assert_eq!(entry.level, LogLevel::Info);
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[test]
    fn test_command_status_batch_roundtrip() {
        let record = CommandExecutionRecord::new(CommandId::new("cmd-1-0"), "/status");
        let msg = Notification::command_history(vec![record.clone()]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"batch\""));
        let parsed: NotificationEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.body,
            Notification::CommandStatusUpdate {
                update: CommandStatusPayload::Batch(vec![record])
            }
        );
    }

    #[test]
    fn test_init_progress_is_clamped() {
        let msg = Notification::init_progress(250, "polling", vec![]);
        match msg.body {
            Notification::InitProgressUpdate { progress, .. } => assert_eq!(progress, 100),
            other => panic!("unexpected notification {other:?}"),
        }
    }
}
