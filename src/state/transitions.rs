use std::{future::Future, sync::Arc, time::SystemTime};

use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    dao::{
        invite_store::{GuardedWrite, InviteStore},
        models::ResolveUpdate,
        storage::{StorageError, StorageResult},
    },
    dto::feed::ChangeEvent,
    error::ServiceError,
    state::{
        SharedState,
        invitation::{Invitation, InvitationId, InviteStatus, Resolution, TransitionError},
    },
};

/// Run `work` on its own task and wait for it under the configured operation timeout.
///
/// The spawned task keeps running after a timeout, so a write that reaches the store
/// still gets its change published even if the caller already gave up.
pub async fn run_bounded<T, Fut>(state: &SharedState, work: Fut) -> Result<T, ServiceError>
where
    T: Send + 'static,
    Fut: Future<Output = StorageResult<T>> + Send + 'static,
{
    let task = tokio::spawn(work);
    let joined = match state.operation_timeout() {
        Some(limit) => timeout(limit, task)
            .await
            .map_err(|_| ServiceError::Timeout)?,
        None => task.await,
    };

    let result = joined
        .map_err(|err| StorageError::unavailable("store task aborted".into(), err))?;
    Ok(result?)
}

/// Perform the status compare-and-swap and publish the canonical row when it wins.
pub async fn apply_guarded_write(
    state: &SharedState,
    store: Arc<dyn InviteStore>,
    id: InvitationId,
    status: InviteStatus,
) -> Result<GuardedWrite, ServiceError> {
    let update = ResolveUpdate::new(status, SystemTime::now());
    let publisher = state.clone();
    run_bounded(state, async move {
        let outcome = store.resolve(id, update).await?;
        if let GuardedWrite::Applied(row) = &outcome {
            let invitation = Invitation::try_from(row.clone())?;
            publisher.feed().publish(ChangeEvent::update(invitation));
        }
        Ok(outcome)
    })
    .await
}

/// Execute one of the guarded resolutions on behalf of `acting_user`.
///
/// The pre-read reports `NotFound` / `NotAuthorized` / `AlreadyResolved` early; the
/// compare-and-swap that follows is what actually decides a race.
pub async fn run_guarded_transition(
    state: &SharedState,
    id: InvitationId,
    resolution: Resolution,
    acting_user: &str,
) -> Result<Invitation, ServiceError> {
    let store = state.require_invite_store().await?;

    let lookup = store.clone();
    let current = run_bounded(state, async move { lookup.find(id).await })
        .await?
        .ok_or(TransitionError::NotFound(id))?;
    let current = Invitation::try_from(current)?;

    if let Err(err) = current.check_resolution(resolution, acting_user) {
        info!(%id, ?resolution, acting_user, error = %err, "transition refused by guard");
        return Err(err.into());
    }

    match apply_guarded_write(state, store, id, resolution.target_status()).await? {
        GuardedWrite::Applied(row) => {
            let invitation = Invitation::try_from(row)?;
            info!(%id, ?resolution, acting_user, status = invitation.status.label(), "invitation resolved");
            Ok(invitation)
        }
        GuardedWrite::Lost(row) => {
            info!(%id, ?resolution, acting_user, status = row.status.as_str(), "lost resolution race");
            Err(TransitionError::AlreadyResolved {
                id,
                status: row.status.as_str(),
            }
            .into())
        }
        GuardedWrite::Missing => {
            warn!(%id, "invitation disappeared between read and guarded write");
            Err(TransitionError::NotFound(id).into())
        }
    }
}
