//! Log entries produced from command output.
//!
//! Entries are ephemeral: they live in memory only, and every consuming
//! buffer keeps at most [`MAX_LOG_ENTRIES`] of them.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::CommandId;

/// Maximum number of entries any consuming buffer keeps.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    Debug,
}

impl LogLevel {
    /// Best-effort mapping of a level name found in structured output.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "info" | "information" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" | "err" | "fatal" => Some(Self::Error),
            "debug" | "trace" => Some(Self::Debug),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Which output stream a chunk of command output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A single line of log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Where the line came from (`stdout`, `stderr`, or the `type` of a JSON line).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    /// Position of the line within its command's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_index: Option<u64>,
}

impl LogEntry {
    /// Creates a free-standing entry timestamped now.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: None,
            command_id: None,
            stream_index: None,
        }
    }

    /// Converts one line of command output into an entry.
    ///
    /// Lines that parse as a JSON object are treated as structured events:
    /// `level` (or a `type` of `error`) sets the level, `message`/`text`/
    /// `content` the message, and `type` the source. Anything else is a plain
    /// line: info on stdout, error on stderr.
    pub fn from_output_line(
        line: &str,
        stream: OutputStream,
        command_id: &CommandId,
        stream_index: u64,
    ) -> Self {
        let (level, message, source) = classify_line(line, stream);
        Self {
            id: Some(format!("{command_id}-{stream_index}")),
            timestamp: Utc::now(),
            level,
            message,
            source: Some(source),
            command_id: Some(command_id.clone()),
            stream_index: Some(stream_index),
        }
    }
}

fn classify_line(line: &str, stream: OutputStream) -> (LogLevel, String, String) {
    let plain_level = match stream {
        OutputStream::Stdout => LogLevel::Info,
        OutputStream::Stderr => LogLevel::Error,
    };
    let plain_source = match stream {
        OutputStream::Stdout => "stdout",
        OutputStream::Stderr => "stderr",
    };

    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return (plain_level, line.to_string(), plain_source.to_string());
    }

    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed)
    else {
        return (plain_level, line.to_string(), plain_source.to_string());
    };

    let kind = map.get("type").and_then(|v| v.as_str());
    let level = map
        .get("level")
        .and_then(|v| v.as_str())
        .and_then(LogLevel::from_name)
        .or_else(|| (kind == Some("error")).then_some(LogLevel::Error))
        .unwrap_or(plain_level);
    let message = ["message", "text", "content", "result"]
        .iter()
        .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| trimmed.to_string());
    let source = kind.unwrap_or("json").to_string();

    (level, message, source)
}

// ============================================================================
// Bounded Buffer
// ============================================================================

/// FIFO buffer of log entries that drops the oldest entry on overflow.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    /// Creates a buffer holding at most [`MAX_LOG_ENTRIES`] entries.
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(MAX_LOG_ENTRIES)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Removes and returns every buffered entry in arrival order.
    pub fn drain(&mut self) -> Vec<LogEntry> {
        self.entries.drain(..).collect()
    }

    /// Returns the most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
