//! docflow protocol - wire format between the daemon and rendering surfaces
//!
//! Messages are flat JSON objects: an envelope header (`id`, `kind`,
//! `timestamp`, `protocol_version`) plus the kind's payload fields. Requests
//! flow from a surface to the daemon; notifications flow back and are never
//! correlated with a request.

pub mod guard;
pub mod message;
pub mod version;

pub use guard::{
    parse_notification, parse_notification_line, parse_request, parse_request_line,
    ProtocolError,
};
pub use message::{
    next_message_id, CommandStatusPayload, Envelope, Notification, NotificationEnvelope, Request,
    RequestEnvelope,
};
pub use version::{ProtocolVersion, VersionError};
