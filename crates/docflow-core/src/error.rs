//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors raised while turning markdown text into entities.
///
/// List parsing is lenient and only fails on internal errors; detail parsing
/// is strict and fails whenever the one expected entity is missing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The document has no header matching the expected pattern.
    #[error("missing {expected} header")]
    MissingHeader { expected: &'static str },

    /// A header was found but a required field could not be read from it.
    #[error("{entity} header is missing its {field}")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },
}

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// Markdown parse failure
    #[error("Failed to parse {document}: {source}")]
    Parse {
        document: String,
        #[source]
        source: ParseError,
    },
}

/// Result type for parser operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::MissingHeader { expected: "epic" };
        assert_eq!(err.to_string(), "missing epic header");

        let err = ParseError::MissingField {
            entity: "epic",
            field: "id",
        };
        assert_eq!(err.to_string(), "epic header is missing its id");
    }

    #[test]
    fn test_domain_error_wraps_parse_error() {
        let err = DomainError::Parse {
            document: "PRD.md".to_string(),
            source: ParseError::MissingHeader { expected: "epic" },
        };
        assert!(err.to_string().contains("PRD.md"));
        assert!(err.to_string().contains("missing epic header"));
    }
}
