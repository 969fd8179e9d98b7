//! DTO definitions used by the invitation REST API, the change feed and the client.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    dto::validation::validate_user_id,
    state::invitation::{Invitation, InviteStatus},
};

/// Payload sent by the inviter to open an invitation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "distinct_participants"))]
pub struct CreateInviteRequest {
    /// User sending the invitation.
    #[validate(custom(function = "validate_user_id"))]
    pub inviter_id: String,
    /// User receiving it; must differ from `inviter_id`.
    #[validate(custom(function = "validate_user_id"))]
    pub invitee_id: String,
}

fn distinct_participants(request: &CreateInviteRequest) -> Result<(), ValidationError> {
    if request.inviter_id == request.invitee_id {
        let mut err = ValidationError::new("self_invite");
        err.message = Some("A user cannot invite themselves".into());
        return Err(err);
    }
    Ok(())
}

/// Identifies who performs an accept / decline / cancel.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct ActingUserRequest {
    /// User performing the transition.
    #[validate(custom(function = "validate_user_id"))]
    pub acting_user_id: String,
}

/// Returned to the invitee when their accept won.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct AcceptResponse {
    /// Session allocated by the winning accept.
    pub session_id: Uuid,
}

/// Wire status of an invitation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatusDto {
    /// Awaiting the invitee.
    Pending,
    /// Accepted; a session id is attached.
    Accepted,
    /// Declined by the invitee.
    Rejected,
    /// Withdrawn by the inviter or expired.
    Cancelled,
}

/// Canonical invitation row as exposed over HTTP and the change feed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct InvitationRecord {
    /// Invitation identifier.
    pub id: Uuid,
    /// Sender.
    pub inviter_id: String,
    /// Recipient.
    pub invitee_id: String,
    /// Current status.
    pub status: InviteStatusDto,
    /// Present if and only if `status` is `accepted`.
    pub session_id: Option<Uuid>,
    /// Creation time, RFC 3339.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    /// Time of the last transition, RFC 3339.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: OffsetDateTime,
}

/// A record whose status and session identifier contradict each other.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invitation record {id} has status {status:?} with session id {session_id:?}")]
pub struct InconsistentRecord {
    /// Offending invitation.
    pub id: Uuid,
    /// Status it claims.
    pub status: InviteStatusDto,
    /// Session id it carries.
    pub session_id: Option<Uuid>,
}

impl From<Invitation> for InvitationRecord {
    fn from(value: Invitation) -> Self {
        let (status, session_id) = match value.status {
            InviteStatus::Pending => (InviteStatusDto::Pending, None),
            InviteStatus::Accepted(session_id) => (InviteStatusDto::Accepted, Some(session_id)),
            InviteStatus::Rejected => (InviteStatusDto::Rejected, None),
            InviteStatus::Cancelled => (InviteStatusDto::Cancelled, None),
        };

        Self {
            id: value.id,
            inviter_id: value.inviter_id,
            invitee_id: value.invitee_id,
            status,
            session_id,
            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

impl TryFrom<InvitationRecord> for Invitation {
    type Error = InconsistentRecord;

    fn try_from(value: InvitationRecord) -> Result<Self, Self::Error> {
        let status = match (value.status, value.session_id) {
            (InviteStatusDto::Pending, None) => InviteStatus::Pending,
            (InviteStatusDto::Accepted, Some(session_id)) => InviteStatus::Accepted(session_id),
            (InviteStatusDto::Rejected, None) => InviteStatus::Rejected,
            (InviteStatusDto::Cancelled, None) => InviteStatus::Cancelled,
            (status, session_id) => {
                return Err(InconsistentRecord {
                    id: value.id,
                    status,
                    session_id,
                });
            }
        };

        Ok(Self {
            id: value.id,
            inviter_id: value.inviter_id,
            invitee_id: value.invitee_id,
            status,
            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_invite_fails_validation() {
        let request = CreateInviteRequest {
            inviter_id: "alice".into(),
            invitee_id: "alice".into(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn blank_invitee_fails_validation() {
        let request = CreateInviteRequest {
            inviter_id: "alice".into(),
            invitee_id: " ".into(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn distinct_participants_pass_validation() {
        let request = CreateInviteRequest {
            inviter_id: "alice".into(),
            invitee_id: "bob".into(),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn accepted_record_serializes_session_and_rfc3339_timestamps() {
        let session = Uuid::new_v4();
        let invitation = Invitation::new_pending("alice", "bob")
            .resolved(InviteStatus::Accepted(session), std::time::SystemTime::now());
        let value = serde_json::to_value(InvitationRecord::from(invitation)).unwrap();

        assert_eq!(value["status"], "accepted");
        assert_eq!(value["session_id"], session.to_string());
        let created_at = value["created_at"].as_str().unwrap();
        assert!(OffsetDateTime::parse(
            created_at,
            &time::format_description::well_known::Rfc3339
        )
        .is_ok());
    }

    #[test]
    fn record_with_dangling_session_is_rejected() {
        let mut record = InvitationRecord::from(Invitation::new_pending("alice", "bob"));
        record.session_id = Some(Uuid::new_v4());
        assert!(Invitation::try_from(record).is_err());
    }
}
