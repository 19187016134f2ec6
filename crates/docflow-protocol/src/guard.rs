//! Type guards over raw JSON values.
//!
//! Each guard checks that a value is an object of one message kind whose
//! payload has the expected shape. [`parse_request`] and
//! [`parse_notification`] dispatch through the guards, so a message is only
//! deserialized into its typed form once its kind and shape are confirmed.

use serde_json::Value;
use thiserror::Error;

use crate::message::{
    NotificationEnvelope, RequestEnvelope, CANCEL_COMMAND, COMMAND_STATUS_UPDATE, ERROR,
    EXECUTE_COMMAND, GET_COMMAND_HISTORY, GET_PROJECT_STATE, INIT_PROGRESS_UPDATE,
    LOG_ENTRY_STREAM, SELECT_EPIC, SELECT_STORY, STATE_UPDATE, THEME_UPDATE,
};
use crate::version::{ProtocolVersion, VersionError};

/// Errors produced while decoding an inbound message.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has no kind")]
    MissingKind,

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("malformed {kind} message")]
    Malformed { kind: String },

    #[error(transparent)]
    Version(#[from] VersionError),
}

fn kind_of(value: &Value) -> Option<&str> {
    value.get("kind").and_then(Value::as_str)
}

fn has_kind(value: &Value, kind: &str) -> bool {
    value.is_object() && kind_of(value) == Some(kind)
}

fn is_string(value: &Value, field: &str) -> bool {
    value.get(field).is_some_and(Value::is_string)
}

fn is_optional_string(value: &Value, field: &str) -> bool {
    value
        .get(field)
        .map_or(true, |v| v.is_string() || v.is_null())
}

// ============================================================================
// Request guards
// ============================================================================

pub fn is_execute_command(value: &Value) -> bool {
    has_kind(value, EXECUTE_COMMAND)
        && is_string(value, "command")
        && value.get("args").map_or(true, |args| {
            args.as_array()
                .is_some_and(|items| items.iter().all(Value::is_string))
        })
}

pub fn is_get_project_state(value: &Value) -> bool {
    has_kind(value, GET_PROJECT_STATE)
}

pub fn is_get_command_history(value: &Value) -> bool {
    has_kind(value, GET_COMMAND_HISTORY)
}

pub fn is_cancel_command(value: &Value) -> bool {
    has_kind(value, CANCEL_COMMAND) && is_optional_string(value, "command_id")
}

pub fn is_select_epic(value: &Value) -> bool {
    has_kind(value, SELECT_EPIC) && is_string(value, "epic_id")
}

pub fn is_select_story(value: &Value) -> bool {
    has_kind(value, SELECT_STORY) && is_string(value, "story_id")
}

const REQUEST_GUARDS: [(&str, fn(&Value) -> bool); 6] = [
    (EXECUTE_COMMAND, is_execute_command),
    (GET_PROJECT_STATE, is_get_project_state),
    (GET_COMMAND_HISTORY, is_get_command_history),
    (CANCEL_COMMAND, is_cancel_command),
    (SELECT_EPIC, is_select_epic),
    (SELECT_STORY, is_select_story),
];

// ============================================================================
// Notification guards
// ============================================================================

pub fn is_state_update(value: &Value) -> bool {
    has_kind(value, STATE_UPDATE)
        && value
            .get("state")
            .is_some_and(|s| s.get("initialized").is_some_and(Value::is_boolean))
}

pub fn is_command_status_update(value: &Value) -> bool {
    has_kind(value, COMMAND_STATUS_UPDATE)
        && value.get("update").is_some_and(|u| {
            u.get("single").is_some_and(Value::is_object)
                || u.get("batch").is_some_and(Value::is_array)
        })
}

pub fn is_log_entry_stream(value: &Value) -> bool {
    has_kind(value, LOG_ENTRY_STREAM)
        && value.get("entry").is_some_and(|e| is_string(e, "message"))
        && is_optional_string(value, "command_id")
}

pub fn is_init_progress_update(value: &Value) -> bool {
    has_kind(value, INIT_PROGRESS_UPDATE)
        && value.get("progress").is_some_and(Value::is_u64)
        && is_string(value, "status")
}

pub fn is_theme_update(value: &Value) -> bool {
    has_kind(value, THEME_UPDATE) && is_string(value, "theme")
}

pub fn is_error(value: &Value) -> bool {
    has_kind(value, ERROR) && is_string(value, "message")
}

const NOTIFICATION_GUARDS: [(&str, fn(&Value) -> bool); 6] = [
    (STATE_UPDATE, is_state_update),
    (COMMAND_STATUS_UPDATE, is_command_status_update),
    (LOG_ENTRY_STREAM, is_log_entry_stream),
    (INIT_PROGRESS_UPDATE, is_init_progress_update),
    (THEME_UPDATE, is_theme_update),
    (ERROR, is_error),
];

// ============================================================================
// Dispatch
// ============================================================================

fn check_shape(
    value: &Value,
    guards: &[(&str, fn(&Value) -> bool)],
) -> Result<(), ProtocolError> {
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    let kind = kind_of(value).ok_or(ProtocolError::MissingKind)?;
    let (_, guard) = guards
        .iter()
        .find(|(name, _)| *name == kind)
        .ok_or_else(|| ProtocolError::UnknownKind(kind.to_string()))?;
    if !guard(value) {
        return Err(ProtocolError::Malformed {
            kind: kind.to_string(),
        });
    }

    // An absent version is treated as current.
    if let Some(raw) = value.get("protocol_version") {
        let version: ProtocolVersion =
            serde_json::from_value(raw.clone()).map_err(|_| ProtocolError::Malformed {
                kind: kind.to_string(),
            })?;
        version.ensure_compatible()?;
    }
    Ok(())
}

/// Decodes an inbound request after confirming its kind and shape.
///
/// # Errors
///
/// Fails for non-objects, unknown kinds, payloads that do not match their
/// kind, and incompatible protocol majors.
pub fn parse_request(value: Value) -> Result<RequestEnvelope, ProtocolError> {
    check_shape(&value, &REQUEST_GUARDS)?;
    let kind = kind_of(&value).unwrap_or_default().to_string();
    serde_json::from_value(value).map_err(|_| ProtocolError::Malformed { kind })
}

/// Decodes one line of newline-delimited JSON as a request.
pub fn parse_request_line(line: &str) -> Result<RequestEnvelope, ProtocolError> {
    parse_request(serde_json::from_str(line)?)
}

/// Decodes an outbound notification after confirming its kind and shape.
pub fn parse_notification(value: Value) -> Result<NotificationEnvelope, ProtocolError> {
    check_shape(&value, &NOTIFICATION_GUARDS)?;
    let kind = kind_of(&value).unwrap_or_default().to_string();
    serde_json::from_value(value).map_err(|_| ProtocolError::Malformed { kind })
}

pub fn parse_notification_line(line: &str) -> Result<NotificationEnvelope, ProtocolError> {
    parse_notification(serde_json::from_str(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Notification, Request};
    use docflow_core::{ProjectState, ThemeKind};
    use serde_json::json;

    #[test]
    fn test_execute_command_guard() {
        assert!(is_execute_command(&json!({"kind": "execute-command", "command": "/x"})));
        assert!(is_execute_command(
            &json!({"kind": "execute-command", "command": "/x", "args": ["a", "b"]})
        ));
        assert!(!is_execute_command(&json!({"kind": "execute-command"})));
        assert!(!is_execute_command(
            &json!({"kind": "execute-command", "command": "/x", "args": [1]})
        ));
        assert!(!is_execute_command(&json!({"kind": "get-project-state", "command": "/x"})));
        assert!(!is_execute_command(&json!("execute-command")));
    }

    #[test]
    fn test_guards_are_exclusive() {
        let value = json!({"kind": "get-project-state"});
        assert!(is_get_project_state(&value));
        assert!(!is_get_command_history(&value));
        assert!(!is_state_update(&value));
    }

    #[test]
    fn test_parse_request_dispatch() {
        let parsed = parse_request(json!({
            "id": "m1", "timestamp": 1, "kind": "select-epic", "epic_id": "2"
        }))
        .unwrap();
        assert_eq!(
            parsed.body,
            Request::SelectEpic {
                epic_id: "2".to_string()
            }
        );

        let line = serde_json::to_string(&Request::cancel(None)).unwrap();
        let parsed = parse_request_line(&line).unwrap();
        assert_eq!(parsed.body, Request::CancelCommand { command_id: None });
    }

    #[test]
    fn test_parse_request_errors() {
        assert!(matches!(parse_request(json!([1, 2])), Err(ProtocolError::NotAnObject)));
        assert!(matches!(parse_request(json!({"id": "x"})), Err(ProtocolError::MissingKind)));
        assert!(matches!(
            parse_request(json!({"id": "x", "timestamp": 1, "kind": "nope"})),
            Err(ProtocolError::UnknownKind(k)) if k == "nope"
        ));
        assert!(matches!(
            parse_request(json!({"id": "x", "timestamp": 1, "kind": "select-story"})),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(parse_request_line("{oops"), Err(ProtocolError::Json(_))));
        // Notifications are not accepted as requests.
        assert!(matches!(
            parse_request(json!({"id": "x", "timestamp": 1, "kind": "theme-update", "theme": "dark"})),
            Err(ProtocolError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_incompatible_major_rejected() {
        let result = parse_request(json!({
            "id": "x", "timestamp": 1, "kind": "get-project-state",
            "protocol_version": {"major": 9, "minor": 0}
        }));
        assert!(matches!(result, Err(ProtocolError::Version(_))));
    }

    #[test]
    fn test_notification_guards_match_constructors() {
        let state = serde_json::to_value(Notification::state_update(ProjectState::uninitialized()))
            .unwrap();
        assert!(is_state_update(&state));

        let theme = serde_json::to_value(Notification::theme(ThemeKind::Dark)).unwrap();
        assert!(is_theme_update(&theme));
        assert!(!is_error(&theme));

        let progress =
            serde_json::to_value(Notification::init_progress(40, "polling", vec![])).unwrap();
        assert!(is_init_progress_update(&progress));

        let history = serde_json::to_value(Notification::command_history(vec![])).unwrap();
        assert!(is_command_status_update(&history));

        let parsed = parse_notification(theme).unwrap();
        assert_eq!(parsed.body.kind(), THEME_UPDATE);
    }
}
