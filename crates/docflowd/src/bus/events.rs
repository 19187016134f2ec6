//! Event kinds and payloads carried by the state event bus.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use docflow_core::{CommandId, LogEntry, ProjectState, ThemeKind};

/// The fixed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProjectStateChanged,
    CommandStarted,
    CommandProgress,
    CommandCompleted,
    CommandFailed,
    LogEntryAdded,
    EpicSelected,
    StorySelected,
    ThemeChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        Self::ProjectStateChanged,
        Self::CommandStarted,
        Self::CommandProgress,
        Self::CommandCompleted,
        Self::CommandFailed,
        Self::LogEntryAdded,
        Self::EpicSelected,
        Self::StorySelected,
        Self::ThemeChanged,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProjectStateChanged => "PROJECT_STATE_CHANGED",
            Self::CommandStarted => "COMMAND_STARTED",
            Self::CommandProgress => "COMMAND_PROGRESS",
            Self::CommandCompleted => "COMMAND_COMPLETED",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::LogEntryAdded => "LOG_ENTRY_ADDED",
            Self::EpicSelected => "EPIC_SELECTED",
            Self::StorySelected => "STORY_SELECTED",
            Self::ThemeChanged => "THEME_CHANGED",
        }
    }

    /// Looks up a kind by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Kind-specific payload. The variant is the event's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    ProjectStateChanged {
        state: Arc<ProjectState>,
    },
    CommandStarted {
        command_id: CommandId,
        command: String,
    },
    /// A record changed; re-read it from the run log.
    CommandProgress {
        command_id: CommandId,
    },
    CommandCompleted {
        command_id: CommandId,
        success: bool,
        duration_ms: u64,
    },
    CommandFailed {
        command_id: CommandId,
        error: String,
        cancelled: bool,
    },
    LogEntryAdded {
        entry: LogEntry,
    },
    EpicSelected {
        epic_id: String,
    },
    StorySelected {
        story_id: String,
    },
    ThemeChanged {
        theme: ThemeKind,
    },
}

impl EventPayload {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ProjectStateChanged { .. } => EventKind::ProjectStateChanged,
            Self::CommandStarted { .. } => EventKind::CommandStarted,
            Self::CommandProgress { .. } => EventKind::CommandProgress,
            Self::CommandCompleted { .. } => EventKind::CommandCompleted,
            Self::CommandFailed { .. } => EventKind::CommandFailed,
            Self::LogEntryAdded { .. } => EventKind::LogEntryAdded,
            Self::EpicSelected { .. } => EventKind::EpicSelected,
            Self::StorySelected { .. } => EventKind::StorySelected,
            Self::ThemeChanged { .. } => EventKind::ThemeChanged,
        }
    }
}

/// An emitted event: payload plus emission time.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    /// Unix milliseconds at emission.
    pub timestamp: i64,
    pub payload: EventPayload,
}

impl StateEvent {
    pub fn now(payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            payload,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
