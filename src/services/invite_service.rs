use tracing::info;

use crate::{
    dao::{models::InvitationEntity, storage::StorageError},
    dto::{
        feed::ChangeEvent,
        invite::{CreateInviteRequest, InvitationRecord},
    },
    error::ServiceError,
    state::{
        SharedState,
        invitation::{Invitation, InvitationId, Resolution, SessionId, TransitionError},
        transitions::{run_bounded, run_guarded_transition},
    },
};

/// Open a new pending invitation from `inviter_id` to `invitee_id`.
///
/// Several pending invitations between the same pair may coexist; each one is
/// resolved independently.
pub async fn create_invite(
    state: &SharedState,
    request: CreateInviteRequest,
) -> Result<InvitationRecord, ServiceError> {
    let CreateInviteRequest {
        inviter_id,
        invitee_id,
    } = request;

    if inviter_id.trim().is_empty() || invitee_id.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "inviter and invitee must both be set".into(),
        ));
    }
    if inviter_id == invitee_id {
        return Err(ServiceError::InvalidInput(
            "a user cannot invite themselves".into(),
        ));
    }

    let store = state.require_invite_store().await?;
    let invitation = Invitation::new_pending(inviter_id, invitee_id);
    let entity = InvitationEntity::from(invitation.clone());
    let publisher = state.clone();
    let published = invitation.clone();

    run_bounded(state, async move {
        store.insert(entity).await?;
        publisher.feed().publish(ChangeEvent::insert(published));
        Ok(())
    })
    .await?;

    info!(
        id = %invitation.id,
        inviter = %invitation.inviter_id,
        invitee = %invitation.invitee_id,
        "invitation created"
    );
    Ok(invitation.into())
}

/// Fetch the canonical row of an invitation.
pub async fn get_invite(
    state: &SharedState,
    id: InvitationId,
) -> Result<InvitationRecord, ServiceError> {
    let store = state.require_invite_store().await?;
    let row = run_bounded(state, async move { store.find(id).await })
        .await?
        .ok_or(TransitionError::NotFound(id))?;
    let invitation = Invitation::try_from(row)?;
    Ok(invitation.into())
}

/// Accept a pending invitation as its invitee and return the new session identifier.
pub async fn accept_invite(
    state: &SharedState,
    id: InvitationId,
    acting_user: &str,
) -> Result<SessionId, ServiceError> {
    let invitation = run_guarded_transition(state, id, Resolution::Accept, acting_user).await?;
    invitation.session_id().ok_or_else(|| {
        StorageError::corrupt(id, "accepted invitation stored without a session").into()
    })
}

/// Decline a pending invitation as its invitee.
pub async fn decline_invite(
    state: &SharedState,
    id: InvitationId,
    acting_user: &str,
) -> Result<(), ServiceError> {
    run_guarded_transition(state, id, Resolution::Decline, acting_user).await?;
    Ok(())
}

/// Withdraw a pending invitation as its inviter.
pub async fn cancel_invite(
    state: &SharedState,
    id: InvitationId,
    acting_user: &str,
) -> Result<(), ServiceError> {
    run_guarded_transition(state, id, Resolution::Cancel, acting_user).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::invite_store::memory::MemoryInviteStore,
        dto::{feed::ChangeKind, invite::InviteStatusDto},
        state::AppState,
    };

    async fn state() -> SharedState {
        AppState::with_store(AppConfig::default(), Arc::new(MemoryInviteStore::new())).await
    }

    fn request(inviter: &str, invitee: &str) -> CreateInviteRequest {
        CreateInviteRequest {
            inviter_id: inviter.into(),
            invitee_id: invitee.into(),
        }
    }

    #[tokio::test]
    async fn create_publishes_insert_with_pending_row() {
        let state = state().await;
        let mut feed = state.feed().subscribe();

        let record = create_invite(&state, request("alice", "bob")).await.unwrap();
        assert_eq!(record.status, InviteStatusDto::Pending);
        assert_eq!(record.session_id, None);

        let event = feed.recv().await.unwrap();
        assert_eq!(event.event_type, ChangeKind::Insert);
        assert_eq!(event.row, record);
    }

    #[tokio::test]
    async fn create_rejects_self_invite() {
        let state = state().await;
        let err = create_invite(&state, request("alice", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn same_pair_may_hold_several_pending_invites() {
        let state = state().await;
        let first = create_invite(&state, request("alice", "bob")).await.unwrap();
        let second = create_invite(&state, request("alice", "bob")).await.unwrap();
        assert_ne!(first.id, second.id);

        decline_invite(&state, first.id, "bob").await.unwrap();
        let session = accept_invite(&state, second.id, "bob").await.unwrap();
        let second = get_invite(&state, second.id).await.unwrap();
        assert_eq!(second.session_id, Some(session));
    }

    #[tokio::test]
    async fn accept_publishes_update_carrying_session() {
        let state = state().await;
        let record = create_invite(&state, request("alice", "bob")).await.unwrap();
        let mut feed = state.feed().subscribe();

        let session = accept_invite(&state, record.id, "bob").await.unwrap();

        let event = feed.recv().await.unwrap();
        assert_eq!(event.event_type, ChangeKind::Update);
        assert_eq!(event.row.status, InviteStatusDto::Accepted);
        assert_eq!(event.row.session_id, Some(session));
    }

    #[tokio::test]
    async fn second_resolution_reports_already_resolved_without_event() {
        let state = state().await;
        let record = create_invite(&state, request("alice", "bob")).await.unwrap();
        cancel_invite(&state, record.id, "alice").await.unwrap();

        let mut feed = state.feed().subscribe();
        let err = accept_invite(&state, record.id, "bob").await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyResolved(_)));

        let nothing = tokio::time::timeout(Duration::from_millis(50), feed.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn wrong_party_is_not_authorized() {
        let state = state().await;
        let record = create_invite(&state, request("alice", "bob")).await.unwrap();

        let inviter_accepts = accept_invite(&state, record.id, "alice").await.unwrap_err();
        assert!(matches!(inviter_accepts, ServiceError::NotAuthorized(_)));

        let invitee_cancels = cancel_invite(&state, record.id, "bob").await.unwrap_err();
        assert!(matches!(invitee_cancels, ServiceError::NotAuthorized(_)));

        let outsider = decline_invite(&state, record.id, "mallory")
            .await
            .unwrap_err();
        assert!(matches!(outsider, ServiceError::NotAuthorized(_)));

        let row = get_invite(&state, record.id).await.unwrap();
        assert_eq!(row.status, InviteStatusDto::Pending);
    }

    #[tokio::test]
    async fn unknown_invitation_is_not_found() {
        let state = state().await;
        let err = accept_invite(&state, Uuid::new_v4(), "bob").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn operations_fail_while_degraded() {
        let state = AppState::new(AppConfig::default());
        let err = create_invite(&state, request("alice", "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }
}
