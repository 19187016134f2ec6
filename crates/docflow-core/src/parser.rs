//! Line-oriented parser for the workflow's markdown documents.
//!
//! Three documents are understood:
//!
//! - the epic detail (`# Epic #<id>: <title>` plus a `## Description` block),
//! - the epics list (repeated `## Epic #<id>: <title> [<status>]` sections),
//! - the story list (repeated `## Story #<id>: <title> [P0..P3]` sections with
//!   checkbox tickets).
//!
//! List parsing is lenient: sections whose header lacks an id or a title are
//! dropped silently. Detail parsing is strict: the single expected epic must
//! be present or the call fails.
//!
//! Headers are scanned into builders whose fields are all optional, and a
//! builder is only promoted to an entity once both id and title are known.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::error::{ParseError, ParseResult};
use crate::model::{EntityStatus, Epic, Priority, Story, Ticket, TicketStatus};

// ============================================================================
// Line Patterns
// ============================================================================

// Patterns are constants; a failed compile degrades to "never matches"
// rather than panicking.
static EPIC_DETAIL_HEADER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^#\s+Epic\b\s*#?\s*(\d*)\s*:?\s*(.*?)\s*$").ok());

static EPIC_LIST_HEADER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^##\s+Epic\b\s*#?\s*(\d*)\s*:?\s*(.*?)\s*$").ok());

static STORY_HEADER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^##\s+Story\b\s*#?\s*(\d*)\s*:?\s*(.*?)\s*$").ok());

static DESCRIPTION_MARKER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)^##\s+Description\s*$").ok());

static TICKET_SECTION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)^###\s+(Tasks|Tickets)\s*$").ok());

static CHECKBOX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[-*]\s+\[([ xX~\-])\]\s*(.*?)\s*$").ok());

static TRAILING_BRACKET: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(.*?)\s*\[([^\[\]]*)\]$").ok());

fn captures<'t>(pattern: &Option<Regex>, line: &'t str) -> Option<Captures<'t>> {
    pattern.as_ref()?.captures(line)
}

fn is_match(pattern: &Option<Regex>, line: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(line))
}

/// Returns the `(id, rest)` groups of a matched entity header.
fn header_groups<'t>(caps: &Captures<'t>) -> (&'t str, &'t str) {
    let id = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let rest = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    (id, rest)
}

/// Returns the markdown header level of a (trimmed) line, if it is a header.
fn header_level(line: &str) -> Option<usize> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 {
        return None;
    }
    match line.chars().nth(hashes) {
        None => Some(hashes),
        Some(c) if c.is_whitespace() => Some(hashes),
        Some(_) => None,
    }
}

/// Splits a trailing `[...]` off a header title.
fn split_bracket(raw: &str) -> (String, Option<String>) {
    match captures(&TRAILING_BRACKET, raw) {
        Some(caps) => {
            let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let bracket = caps.get(2).map(|m| m.as_str().trim().to_string());
            (title.to_string(), bracket)
        }
        None => (raw.trim().to_string(), None),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ============================================================================
// Status Mapping
// ============================================================================

/// Maps a free-text status (from a header bracket) to an [`EntityStatus`].
///
/// Case-insensitive. `active`, `in progress` and `current` map to active;
/// `completed`, `done` and `finished` map to completed; anything else,
/// including no status at all, maps to planned.
#[must_use]
pub fn parse_status(raw: Option<&str>) -> EntityStatus {
    let Some(raw) = raw else {
        return EntityStatus::Planned;
    };
    match raw.trim().to_lowercase().as_str() {
        "active" | "in progress" | "current" => EntityStatus::Active,
        "completed" | "done" | "finished" => EntityStatus::Completed,
        _ => EntityStatus::Planned,
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Accumulates an epic while its section is being scanned.
#[derive(Debug, Default)]
struct EpicBuilder {
    id: Option<String>,
    title: Option<String>,
    status: EntityStatus,
    description: Vec<String>,
}

impl EpicBuilder {
    fn from_header(id: &str, rest: &str, default_status: EntityStatus) -> Self {
        let (title, bracket) = split_bracket(rest);
        let status = match bracket {
            Some(ref b) => parse_status(Some(b)),
            None => default_status,
        };
        Self {
            id: non_empty(id),
            title: non_empty(&title),
            status,
            description: Vec::new(),
        }
    }

    fn push_line(&mut self, line: &str) {
        self.description.push(line.trim_end().to_string());
    }

    /// Promotes the builder, failing when id or title is missing.
    fn build(self) -> ParseResult<Epic> {
        let id = self.id.ok_or(ParseError::MissingField {
            entity: "epic",
            field: "id",
        })?;
        let title = self.title.ok_or(ParseError::MissingField {
            entity: "epic",
            field: "title",
        })?;
        Ok(Epic {
            id,
            title,
            status: self.status,
            description: non_empty(&self.description.join("\n")),
            stories: Vec::new(),
        })
    }
}

/// Accumulates a story while its section is being scanned.
#[derive(Debug, Default)]
struct StoryBuilder {
    id: Option<String>,
    title: Option<String>,
    priority: Priority,
    description: Vec<String>,
    tickets: Vec<(TicketStatus, String)>,
}

impl StoryBuilder {
    fn from_header(id: &str, rest: &str) -> Self {
        let (title, bracket) = split_bracket(rest);
        let priority = bracket
            .as_deref()
            .and_then(Priority::parse)
            .unwrap_or_default();
        Self {
            id: non_empty(id),
            title: non_empty(&title),
            priority,
            ..Self::default()
        }
    }

    fn build(self, epic_id: &str) -> ParseResult<Story> {
        let id = self.id.ok_or(ParseError::MissingField {
            entity: "story",
            field: "id",
        })?;
        let title = self.title.ok_or(ParseError::MissingField {
            entity: "story",
            field: "title",
        })?;

        let tickets: Vec<Ticket> = self
            .tickets
            .into_iter()
            .enumerate()
            .map(|(index, (status, text))| Ticket {
                id: format!("{id}-{}", index + 1),
                title: text,
                status,
                description: None,
                story_id: id.clone(),
            })
            .collect();

        Ok(Story {
            status: Story::status_from_tickets(&tickets),
            description: non_empty(&self.description.join("\n")),
            id,
            title,
            priority: self.priority,
            tickets,
            epic_id: epic_id.to_string(),
        })
    }
}

// ============================================================================
// Entry Points
// ============================================================================

/// Parses the current-epic detail document.
///
/// Expects a single `# Epic #<id>: <title>` header. Lines following a
/// `## Description` marker are collected (until the next header) as the
/// description. A trailing `[status]` on the header is honored; otherwise the
/// epic is reported as active since it is the current one.
///
/// # Errors
///
/// - [`ParseError::MissingHeader`] if no epic header is present
/// - [`ParseError::MissingField`] if the header lacks an id or a title
pub fn parse_epic_detail(text: &str) -> ParseResult<Epic> {
    let mut builder: Option<EpicBuilder> = None;
    let mut in_description = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if header_level(trimmed).is_some() {
            if builder.is_none() {
                if let Some(caps) = captures(&EPIC_DETAIL_HEADER, trimmed) {
                    let (id, rest) = header_groups(&caps);
                    builder = Some(EpicBuilder::from_header(id, rest, EntityStatus::Active));
                    in_description = false;
                    continue;
                }
            }
            in_description = is_match(&DESCRIPTION_MARKER, trimmed);
            continue;
        }

        if in_description {
            if let Some(b) = builder.as_mut() {
                b.push_line(line);
            }
        }
    }

    builder
        .ok_or(ParseError::MissingHeader { expected: "epic" })?
        .build()
}

/// Parses the epics list document.
///
/// Each `## Epic #<id>: <title> [<status>]` header opens a section; any
/// level 1 or 2 header closes it, whether or not it is an epic header.
/// Deeper headers are skipped. Sections missing an id or title are dropped.
pub fn parse_epic_list(text: &str) -> ParseResult<Vec<Epic>> {
    let mut epics = Vec::new();
    let mut current: Option<EpicBuilder> = None;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(level) = header_level(trimmed) {
            if level <= 2 {
                if let Some(builder) = current.take() {
                    push_lenient(&mut epics, builder.build());
                }
                if let Some(caps) = captures(&EPIC_LIST_HEADER, trimmed) {
                    let (id, rest) = header_groups(&caps);
                    current = Some(EpicBuilder::from_header(id, rest, EntityStatus::Planned));
                }
            }
            continue;
        }

        if let Some(builder) = current.as_mut() {
            builder.push_line(line);
        }
    }

    if let Some(builder) = current.take() {
        push_lenient(&mut epics, builder.build());
    }

    Ok(epics)
}

/// Parses a story list document, assigning `epic_id` to every story.
///
/// `### Tasks` / `### Tickets` sub-headers are structural only. Checkbox
/// lines become tickets with ids `{story_id}-{n}` in document order; every
/// other non-header line is description. Stories missing an id or title
/// are dropped.
pub fn parse_story_list(text: &str, epic_id: &str) -> ParseResult<Vec<Story>> {
    let mut stories = Vec::new();
    let mut current: Option<StoryBuilder> = None;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(level) = header_level(trimmed) {
            if level <= 2 {
                if let Some(builder) = current.take() {
                    push_lenient(&mut stories, builder.build(epic_id));
                }
                if let Some(caps) = captures(&STORY_HEADER, trimmed) {
                    let (id, rest) = header_groups(&caps);
                    current = Some(StoryBuilder::from_header(id, rest));
                }
            } else if !is_match(&TICKET_SECTION, trimmed) {
                debug!(header = trimmed, "Skipping sub-header inside story list");
            }
            continue;
        }

        let Some(builder) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = captures(&CHECKBOX, trimmed) {
            let mark = caps
                .get(1)
                .and_then(|m| m.as_str().chars().next())
                .unwrap_or(' ');
            let text = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if let Some(title) = non_empty(text) {
                builder
                    .tickets
                    .push((TicketStatus::from_checkbox(mark), title));
            }
            continue;
        }

        builder.description.push(line.trim_end().to_string());
    }

    if let Some(builder) = current.take() {
        push_lenient(&mut stories, builder.build(epic_id));
    }

    Ok(stories)
}

fn push_lenient<T>(out: &mut Vec<T>, built: ParseResult<T>) {
    match built {
        Ok(entity) => out.push(entity),
        Err(e) => debug!(error = %e, "Dropping incomplete section"),
    }
}

/// Returns the text of the first level-1 heading, if any.
pub fn parse_title(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.trim_end().strip_prefix("# "))
        .and_then(non_empty)
}
