use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::models::InvitationEntity;

pub const INVITATION_PREFIX: &str = "invitation::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[allow(dead_code)]
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Invitation document; `_rev` is the optimistic concurrency token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchInvitationDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub invitation: InvitationEntity,
}

impl CouchInvitationDocument {
    pub fn new(invitation: InvitationEntity) -> Self {
        Self {
            id: invitation_doc_id(invitation.id),
            rev: None,
            invitation,
        }
    }
}

pub fn invitation_doc_id(id: Uuid) -> String {
    format!("{INVITATION_PREFIX}{id}")
}
