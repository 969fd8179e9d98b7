use std::str::FromStr;

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{InvitationEntity, InviteStatusEntity};

/// Shape of an invitation inside the `invitations` collection.
///
/// Identifiers are stored as strings so the guarded filter can match them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoInvitationDocument {
    #[serde(rename = "_id")]
    id: String,
    inviter_id: String,
    invitee_id: String,
    status: InviteStatusEntity,
    session_id: Option<String>,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<InvitationEntity> for MongoInvitationDocument {
    fn from(value: InvitationEntity) -> Self {
        Self {
            id: value.id.to_string(),
            inviter_id: value.inviter_id,
            invitee_id: value.invitee_id,
            status: value.status,
            session_id: value.session_id.map(|id| id.to_string()),
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoInvitationDocument> for InvitationEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoInvitationDocument) -> Result<Self, Self::Error> {
        let id = parse_uuid(&value.id, &value.id)?;
        let session_id = value
            .session_id
            .as_deref()
            .map(|raw| parse_uuid(&value.id, raw))
            .transpose()?;

        Ok(Self {
            id,
            inviter_id: value.inviter_id,
            invitee_id: value.invitee_id,
            status: value.status,
            session_id,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

fn parse_uuid(doc_id: &str, raw: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::from_str(raw).map_err(|err| MongoDaoError::InvalidDocument {
        doc_id: doc_id.to_owned(),
        reason: format!("`{raw}` is not a UUID: {err}"),
    })
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}
