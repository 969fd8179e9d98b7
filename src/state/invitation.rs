use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

/// Identifier of a participant (inviter or invitee).
pub type UserId = String;
/// Identifier of an invitation row.
pub type InvitationId = Uuid;
/// Opaque identifier of the game session produced by a successful accept.
pub type SessionId = Uuid;

/// Lifecycle of an invitation. Every variant except [`InviteStatus::Pending`] is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InviteStatus {
    /// Waiting for the invitee to answer or the inviter to withdraw.
    Pending,
    /// The invitee accepted; the session identifier was assigned with the transition.
    Accepted(SessionId),
    /// The invitee declined.
    Rejected,
    /// The inviter withdrew the invitation (or it expired).
    Cancelled,
}

impl InviteStatus {
    /// Whether the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InviteStatus::Pending)
    }

    /// Session identifier carried by an accepted invitation.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            InviteStatus::Accepted(session_id) => Some(*session_id),
            _ => None,
        }
    }

    /// Stable lowercase label, matching the persisted and wire representations.
    pub fn label(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted(_) => "accepted",
            InviteStatus::Rejected => "rejected",
            InviteStatus::Cancelled => "cancelled",
        }
    }
}

/// The three guarded ways a pending invitation can be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Invitee accepts; a session gets allocated.
    Accept,
    /// Invitee declines.
    Decline,
    /// Inviter withdraws.
    Cancel,
}

impl Resolution {
    /// Party allowed to perform this resolution.
    pub fn actor(&self) -> Party {
        match self {
            Resolution::Accept | Resolution::Decline => Party::Invitee,
            Resolution::Cancel => Party::Inviter,
        }
    }

    /// Status the invitation ends in if this resolution wins.
    ///
    /// Accepting allocates a fresh session identifier; it only becomes visible if the
    /// guarded write that carries it succeeds.
    pub fn target_status(&self) -> InviteStatus {
        match self {
            Resolution::Accept => InviteStatus::Accepted(Uuid::new_v4()),
            Resolution::Decline => InviteStatus::Rejected,
            Resolution::Cancel => InviteStatus::Cancelled,
        }
    }
}

/// Side of an invitation a user stands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    /// The user who created the invitation.
    Inviter,
    /// The user the invitation is addressed to.
    Invitee,
}

/// Guard failures of the transition operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Another transition already won; the invitation is no longer pending.
    #[error("invitation {id} was already resolved ({status})")]
    AlreadyResolved {
        /// Invitation the caller tried to resolve.
        id: InvitationId,
        /// Status label that was found instead of `pending`.
        status: &'static str,
    },
    /// The acting user is not the party allowed to perform this resolution.
    #[error("user `{user}` may not {resolution:?} invitation {id}")]
    NotAuthorized {
        /// Invitation the caller tried to resolve.
        id: InvitationId,
        /// Acting user.
        user: UserId,
        /// Attempted resolution.
        resolution: Resolution,
    },
    /// No invitation exists under this identifier.
    #[error("invitation {0} not found")]
    NotFound(InvitationId),
}

/// Canonical invitation as stored and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    /// Identifier assigned at creation.
    pub id: InvitationId,
    /// User who sent the invitation.
    pub inviter_id: UserId,
    /// User the invitation is addressed to.
    pub invitee_id: UserId,
    /// Current status; carries the session identifier once accepted.
    pub status: InviteStatus,
    /// Creation time.
    pub created_at: SystemTime,
    /// Time of the last status transition (equals `created_at` while pending).
    pub updated_at: SystemTime,
}

impl Invitation {
    /// Build a fresh pending invitation between two users.
    pub fn new_pending(inviter_id: impl Into<UserId>, invitee_id: impl Into<UserId>) -> Self {
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            inviter_id: inviter_id.into(),
            invitee_id: invitee_id.into(),
            status: InviteStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Side the given user stands on, if they take part in this invitation.
    pub fn party_of(&self, user: &str) -> Option<Party> {
        if self.inviter_id == user {
            Some(Party::Inviter)
        } else if self.invitee_id == user {
            Some(Party::Invitee)
        } else {
            None
        }
    }

    /// Session identifier, present if and only if the invitation was accepted.
    pub fn session_id(&self) -> Option<SessionId> {
        self.status.session_id()
    }

    /// Evaluate the guard of a resolution for `acting_user`.
    ///
    /// Authorization is checked before the status so a non-participant always gets
    /// [`TransitionError::NotAuthorized`], whatever the current status is.
    pub fn check_resolution(
        &self,
        resolution: Resolution,
        acting_user: &str,
    ) -> Result<(), TransitionError> {
        let allowed = match resolution.actor() {
            Party::Inviter => self.inviter_id == acting_user,
            Party::Invitee => self.invitee_id == acting_user,
        };
        if !allowed {
            return Err(TransitionError::NotAuthorized {
                id: self.id,
                user: acting_user.to_owned(),
                resolution,
            });
        }

        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyResolved {
                id: self.id,
                status: self.status.label(),
            });
        }

        Ok(())
    }

    /// Return the invitation after `resolution` won the guard.
    pub fn resolved(mut self, status: InviteStatus, at: SystemTime) -> Self {
        self.status = status;
        self.updated_at = at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Invitation {
        Invitation::new_pending("alice", "bob")
    }

    #[test]
    fn new_invitation_is_pending_without_session() {
        let invitation = pending();
        assert_eq!(invitation.status, InviteStatus::Pending);
        assert_eq!(invitation.session_id(), None);
        assert_eq!(invitation.created_at, invitation.updated_at);
    }

    #[test]
    fn invitee_may_accept_and_decline_but_not_cancel() {
        let invitation = pending();
        assert!(invitation.check_resolution(Resolution::Accept, "bob").is_ok());
        assert!(invitation.check_resolution(Resolution::Decline, "bob").is_ok());
        assert!(matches!(
            invitation.check_resolution(Resolution::Cancel, "bob"),
            Err(TransitionError::NotAuthorized { .. })
        ));
    }

    #[test]
    fn inviter_may_only_cancel() {
        let invitation = pending();
        assert!(invitation.check_resolution(Resolution::Cancel, "alice").is_ok());
        assert!(matches!(
            invitation.check_resolution(Resolution::Accept, "alice"),
            Err(TransitionError::NotAuthorized { .. })
        ));
    }

    #[test]
    fn authorization_is_reported_before_status() {
        let invitation = pending().resolved(InviteStatus::Cancelled, SystemTime::now());
        let err = invitation
            .check_resolution(Resolution::Accept, "mallory")
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotAuthorized { .. }));
    }

    #[test]
    fn resolved_invitation_rejects_every_resolution() {
        let session = Uuid::new_v4();
        let invitation = pending().resolved(InviteStatus::Accepted(session), SystemTime::now());
        assert_eq!(invitation.session_id(), Some(session));

        for (resolution, user) in [
            (Resolution::Accept, "bob"),
            (Resolution::Decline, "bob"),
            (Resolution::Cancel, "alice"),
        ] {
            match invitation.check_resolution(resolution, user) {
                Err(TransitionError::AlreadyResolved { status, .. }) => {
                    assert_eq!(status, "accepted")
                }
                other => panic!("expected AlreadyResolved, got {other:?}"),
            }
        }
    }

    #[test]
    fn party_lookup() {
        let invitation = pending();
        assert_eq!(invitation.party_of("alice"), Some(Party::Inviter));
        assert_eq!(invitation.party_of("bob"), Some(Party::Invitee));
        assert_eq!(invitation.party_of("carol"), None);
    }
}
