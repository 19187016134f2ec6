//! Well-known document locations, relative to the project root.
//!
//! The external workflow CLI creates and maintains these files; docflow only
//! reads them.

pub const README: &str = "README.md";
pub const EPICS: &str = "docs/1-project/EPICS.md";
pub const FEEDBACK: &str = "docs/1-project/FEEDBACK.md";
pub const CHALLENGE: &str = "docs/1-project/CHALLENGE.md";
pub const STATUS: &str = "docs/1-project/STATUS.md";
pub const ROADMAP: &str = "docs/1-project/ROADMAP.md";
pub const CURRENT_EPIC: &str = "docs/2-current-epic/PRD.md";
pub const CURRENT_STORIES: &str = "docs/2-current-epic/STORIES.md";
pub const CURRENT_STORY: &str = "docs/3-current-task/STORY.md";

/// Files that must exist with real content for the structure to be valid.
pub const REQUIRED_FILES: [&str; 3] = [README, EPICS, ROADMAP];

/// Glob patterns whose changes invalidate the project state.
pub const WATCH_PATTERNS: [&str; 4] = [
    "docs/1-project/**/*.md",
    "docs/2-current-epic/**/*.md",
    "docs/3-current-task/**/*.md",
    README,
];
