//! Display profiles used to decorate incoming invitations.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::invitation::UserId;

const PLACEHOLDER_NAME: &str = "A player";

/// Name and avatar shown next to an incoming invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayProfile {
    /// Name shown to the invitee.
    pub name: String,
    /// Avatar image, if the user has one.
    pub avatar_url: Option<String>,
}

impl DisplayProfile {
    /// Generic profile used whenever the real one cannot be obtained.
    pub fn placeholder() -> Self {
        Self {
            name: PLACEHOLDER_NAME.to_string(),
            avatar_url: None,
        }
    }
}

/// Why a profile could not be obtained.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The user has no profile.
    #[error("no profile for user `{0}`")]
    Unknown(UserId),
    /// The profile source failed.
    #[error("profile lookup failed: {0}")]
    Backend(String),
}

/// Source of display profiles. Failures never block the invitation flow.
pub trait ProfileLookup: Send + Sync {
    /// Fetch the profile of `user_id`.
    fn display_profile(&self, user_id: &str)
    -> BoxFuture<'static, Result<DisplayProfile, ProfileError>>;
}

/// In-memory profile directory.
#[derive(Clone, Default)]
pub struct ProfileDirectory {
    profiles: Arc<DashMap<UserId, DisplayProfile>>,
}

impl ProfileDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the profile of `user_id`.
    pub fn insert(&self, user_id: impl Into<UserId>, profile: DisplayProfile) {
        self.profiles.insert(user_id.into(), profile);
    }
}

impl ProfileLookup for ProfileDirectory {
    fn display_profile(
        &self,
        user_id: &str,
    ) -> BoxFuture<'static, Result<DisplayProfile, ProfileError>> {
        let result = self
            .profiles
            .get(user_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ProfileError::Unknown(user_id.to_owned()));
        Box::pin(async move { result })
    }
}
