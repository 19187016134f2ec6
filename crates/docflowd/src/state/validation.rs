//! Content and structure validation for generated project documents.

use std::path::Path;

use serde::Serialize;

/// Minimum trimmed length a document must exceed to count as real content.
pub const MIN_CONTENT_CHARS: usize = 50;

/// Literal marker of an unfilled template.
pub const PLACEHOLDER_MARKER: &str = "placeholder";

/// True when `text` looks like generated content rather than a stub: more
/// than [`MIN_CONTENT_CHARS`] characters after trimming and no
/// [`PLACEHOLDER_MARKER`] anywhere.
#[must_use]
pub fn is_valid_content(text: &str) -> bool {
    text.trim().chars().count() > MIN_CONTENT_CHARS && !text.contains(PLACEHOLDER_MARKER)
}

/// Result of checking the required documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructureValidation {
    pub valid: bool,
    pub missing_files: Vec<String>,
    pub invalid_files: Vec<String>,
}

/// Checks each relative path under `root`: absent files are missing, present
/// files failing [`is_valid_content`] are invalid. Unreadable files count as
/// missing.
pub async fn validate_structure(root: &Path, required: &[&str]) -> StructureValidation {
    let mut missing_files = Vec::new();
    let mut invalid_files = Vec::new();

    for relative in required {
        match tokio::fs::read_to_string(root.join(relative)).await {
            Ok(text) if is_valid_content(&text) => {}
            Ok(_) => invalid_files.push((*relative).to_string()),
            Err(_) => missing_files.push((*relative).to_string()),
        }
    }

    StructureValidation {
        valid: missing_files.is_empty() && invalid_files.is_empty(),
        missing_files,
        invalid_files,
    }
}

/// True when `path` exists, is readable and passes [`is_valid_content`].
pub async fn has_valid_content(path: &Path) -> bool {
    tokio::fs::read_to_string(path)
        .await
        .map(|text| is_valid_content(&text))
        .unwrap_or(false)
}
