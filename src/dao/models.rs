use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::{
    dao::storage::StorageError,
    state::invitation::{Invitation, InviteStatus},
};

/// Persisted status column of an invitation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatusEntity {
    /// Awaiting resolution.
    Pending,
    /// Accepted by the invitee.
    Accepted,
    /// Declined by the invitee.
    Rejected,
    /// Withdrawn by the inviter or expired.
    Cancelled,
}

impl InviteStatusEntity {
    /// Label used by stores that filter on the raw column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatusEntity::Pending => "pending",
            InviteStatusEntity::Accepted => "accepted",
            InviteStatusEntity::Rejected => "rejected",
            InviteStatusEntity::Cancelled => "cancelled",
        }
    }
}

/// Invitation row as persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvitationEntity {
    /// Primary key.
    pub id: Uuid,
    /// User who created the invitation.
    pub inviter_id: String,
    /// User the invitation is addressed to.
    pub invitee_id: String,
    /// Status column, guarded by the transition operations.
    pub status: InviteStatusEntity,
    /// Session identifier, written together with the `accepted` status.
    pub session_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last status transition.
    pub updated_at: SystemTime,
}

/// Column values written by a guarded status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveUpdate {
    /// New terminal status.
    pub status: InviteStatusEntity,
    /// Session identifier, only set for `accepted`.
    pub session_id: Option<Uuid>,
    /// Transition timestamp.
    pub updated_at: SystemTime,
}

impl ResolveUpdate {
    /// Build the column values for a terminal domain status.
    pub fn new(status: InviteStatus, updated_at: SystemTime) -> Self {
        let (status, session_id) = split_status(status);
        Self {
            status,
            session_id,
            updated_at,
        }
    }

    /// Apply the update to an in-memory row.
    pub fn apply_to(&self, entity: &mut InvitationEntity) {
        entity.status = self.status;
        entity.session_id = self.session_id;
        entity.updated_at = self.updated_at;
    }
}

fn split_status(status: InviteStatus) -> (InviteStatusEntity, Option<Uuid>) {
    match status {
        InviteStatus::Pending => (InviteStatusEntity::Pending, None),
        InviteStatus::Accepted(session_id) => (InviteStatusEntity::Accepted, Some(session_id)),
        InviteStatus::Rejected => (InviteStatusEntity::Rejected, None),
        InviteStatus::Cancelled => (InviteStatusEntity::Cancelled, None),
    }
}

impl From<Invitation> for InvitationEntity {
    fn from(value: Invitation) -> Self {
        let (status, session_id) = split_status(value.status);
        Self {
            id: value.id,
            inviter_id: value.inviter_id,
            invitee_id: value.invitee_id,
            status,
            session_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl TryFrom<InvitationEntity> for Invitation {
    type Error = StorageError;

    fn try_from(value: InvitationEntity) -> Result<Self, Self::Error> {
        let status = match (value.status, value.session_id) {
            (InviteStatusEntity::Accepted, Some(session_id)) => InviteStatus::Accepted(session_id),
            (InviteStatusEntity::Pending, None) => InviteStatus::Pending,
            (InviteStatusEntity::Rejected, None) => InviteStatus::Rejected,
            (InviteStatusEntity::Cancelled, None) => InviteStatus::Cancelled,
            (status, session_id) => {
                return Err(StorageError::corrupt(
                    value.id,
                    format!(
                        "status `{}` inconsistent with session id {session_id:?}",
                        status.as_str()
                    ),
                ));
            }
        };

        Ok(Self {
            id: value.id,
            inviter_id: value.inviter_id,
            invitee_id: value.invitee_id,
            status,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}
