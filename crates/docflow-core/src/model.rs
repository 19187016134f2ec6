//! Work-breakdown entities parsed from the workflow's markdown files.
//!
//! Every value here is rebuilt from scratch on each parse. Nothing is
//! mutated in place after a refresh; a new [`ProjectState`] replaces the
//! old one wholesale.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Status Values
// ============================================================================

/// Lifecycle status shared by epics and stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Not started yet.
    #[default]
    Planned,

    /// Currently being worked on.
    Active,

    /// Done.
    Completed,
}

impl EntityStatus {
    /// Returns the display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Status of a single ticket (a checkbox line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Planned,
    InProgress,
    Completed,
}

impl TicketStatus {
    /// Maps the character inside a checkbox (`[ ]`, `[x]`, `[~]`) to a status.
    #[must_use]
    pub fn from_checkbox(mark: char) -> Self {
        match mark {
            'x' | 'X' => Self::Completed,
            '~' | '-' => Self::InProgress,
            _ => Self::Planned,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Story priority. `P0` is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    /// Parses `P0`..`P3` (case-insensitive, surrounding whitespace ignored).
    ///
    /// Returns `None` for anything else so callers can fall back to the default.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "P0" => Some(Self::P0),
            "P1" => Some(Self::P1),
            "P2" => Some(Self::P2),
            "P3" => Some(Self::P3),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A checkbox item inside a story.
///
/// The id is `{story_id}-{position}` (1-based), so it is only stable as long
/// as the ticket order in the document does not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub story_id: String,
}

/// A story belonging to an epic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub status: EntityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tickets: Vec<Ticket>,
    /// Back-reference to the containing epic, assigned by the parse call.
    pub epic_id: String,
}

impl Story {
    /// Derives a story status from its tickets.
    ///
    /// All tickets completed (and at least one present) means completed;
    /// any completed or in-progress ticket means active.
    #[must_use]
    pub fn status_from_tickets(tickets: &[Ticket]) -> EntityStatus {
        if tickets.is_empty() {
            return EntityStatus::Planned;
        }
        if tickets.iter().all(|t| t.status == TicketStatus::Completed) {
            return EntityStatus::Completed;
        }
        if tickets.iter().any(|t| t.status != TicketStatus::Planned) {
            return EntityStatus::Active;
        }
        EntityStatus::Planned
    }

    /// Returns `(completed, total)` ticket counts.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .tickets
            .iter()
            .filter(|t| t.status == TicketStatus::Completed)
            .count();
        (done, self.tickets.len())
    }
}

/// Top-level unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub title: String,
    pub status: EntityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub stories: Vec<Story>,
}

// ============================================================================
// Project State Aggregate
// ============================================================================

/// Snapshot of the whole project, recomputed from disk on every query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectState {
    /// True iff the epics list file exists.
    pub initialized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_epic: Option<Epic>,
    /// Only ever set together with `current_epic`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_story: Option<Story>,
    pub epics: Vec<Epic>,
    pub has_feedback: bool,
    pub has_challenge: bool,
    pub has_status: bool,
}

impl ProjectState {
    /// The state reported for a root with no workflow files at all.
    #[must_use]
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Looks up an epic by id in the epics list.
    pub fn epic(&self, id: &str) -> Option<&Epic> {
        self.epics.iter().find(|e| e.id == id)
    }

    /// Looks up a story by id across all epics (and the current story).
    pub fn story(&self, id: &str) -> Option<&Story> {
        self.epics
            .iter()
            .flat_map(|e| e.stories.iter())
            .chain(self.current_epic.iter().flat_map(|e| e.stories.iter()))
            .chain(self.current_story.iter())
            .find(|s| s.id == id)
    }
}
