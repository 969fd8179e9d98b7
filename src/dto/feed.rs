//! Change-feed payloads shared by the SSE route and the client decoder.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dto::invite::InvitationRecord;

/// SSE event name used for newly inserted invitations.
pub const EVENT_INVITATION_INSERT: &str = "invitation.insert";
/// SSE event name used for status transitions.
pub const EVENT_INVITATION_UPDATE: &str = "invitation.update";

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE `event:` name, if any.
    pub event: Option<String>,
    /// Serialized JSON placed in the `data:` field.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

/// Kind of row change carried by the feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A new invitation row.
    Insert,
    /// A status transition of an existing row.
    Update,
}

impl ChangeKind {
    /// SSE event name for this kind of change.
    pub fn event_name(&self) -> &'static str {
        match self {
            ChangeKind::Insert => EVENT_INVITATION_INSERT,
            ChangeKind::Update => EVENT_INVITATION_UPDATE,
        }
    }
}

/// One insert or update of an invitation row, as pushed to every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Whether the row was inserted or updated.
    pub event_type: ChangeKind,
    /// Full canonical row after the change.
    pub row: InvitationRecord,
}

impl ChangeEvent {
    /// Event for a freshly created invitation.
    pub fn insert(row: impl Into<InvitationRecord>) -> Self {
        Self {
            event_type: ChangeKind::Insert,
            row: row.into(),
        }
    }

    /// Event for a row whose status just changed.
    pub fn update(row: impl Into<InvitationRecord>) -> Self {
        Self {
            event_type: ChangeKind::Update,
            row: row.into(),
        }
    }

    /// Encode the change for the SSE wire.
    pub fn to_server_event(&self) -> serde_json::Result<ServerEvent> {
        ServerEvent::json(Some(self.event_type.event_name().to_string()), self)
    }
}
