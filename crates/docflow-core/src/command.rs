//! Command identifiers, slash commands and execution records.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::log::OutputStream;

/// Maximum number of execution records kept for display.
pub const MAX_COMMAND_HISTORY: usize = 20;

/// The workflow command that bootstraps a project's documents.
pub const INIT_PROJECT_COMMAND: &str = "/1-project:1-start:1-Init-Project";

static COMMAND_SEQUENCE: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for one command execution.
///
/// Format: `cmd-{unix millis}-{sequence}`; unique within a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh id.
    pub fn generate() -> Self {
        let seq = COMMAND_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("cmd-{}-{seq}", Utc::now().timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommandId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Slash Commands
// ============================================================================

/// A validated workflow command such as `/1-project:1-start:1-Init-Project`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommand {
    raw: String,
    segments: Vec<String>,
}

impl SlashCommand {
    /// Parses a slash command: a leading `/` followed by non-empty,
    /// whitespace-free segments separated by `:`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidFieldValue` when the grammar is not met.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let invalid = || DomainError::InvalidFieldValue {
            field: "command".to_string(),
            value: raw.to_string(),
            expected: "/segment[:segment...]".to_string(),
        };

        let body = raw.trim().strip_prefix('/').ok_or_else(invalid)?;
        let segments: Vec<String> = body.split(':').map(str::to_string).collect();
        if segments
            .iter()
            .any(|s| s.is_empty() || s.chars().any(char::is_whitespace))
        {
            return Err(invalid());
        }

        Ok(Self {
            raw: raw.trim().to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True for the project bootstrap command.
    #[must_use]
    pub fn is_init_project(&self) -> bool {
        self.raw == INIT_PROJECT_COMMAND
    }
}

impl fmt::Display for SlashCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

// ============================================================================
// Execution Records
// ============================================================================

/// Status of a command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl CommandStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Record of one command run, mutated in place as output arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandExecutionRecord {
    pub command_id: CommandId,
    pub command: String,
    pub start_time: DateTime<Utc>,
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock duration in milliseconds, set once finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl CommandExecutionRecord {
    /// Creates a running record starting now.
    pub fn new(command_id: CommandId, command: impl Into<String>) -> Self {
        Self {
            command_id,
            command: command.into(),
            start_time: Utc::now(),
            status: CommandStatus::Running,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: None,
            exit_code: None,
        }
    }

    /// Appends a chunk to the matching output stream.
    pub fn append(&mut self, stream: OutputStream, chunk: &str) {
        match stream {
            OutputStream::Stdout => self.stdout.push_str(chunk),
            OutputStream::Stderr => self.stderr.push_str(chunk),
        }
    }

    /// Moves the record to a terminal status. Finishing twice keeps the first result.
    pub fn finish(&mut self, status: CommandStatus, exit_code: Option<i32>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.exit_code = exit_code;
        let elapsed = Utc::now()
            .signed_duration_since(self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == CommandStatus::Running
    }
}
