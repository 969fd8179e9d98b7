//! Participant-side library: a handle over the protocol operations plus an event
//! router keeping a local view of the user's invitations in sync with the store.

pub mod api;
pub mod feed;
pub mod machine;
pub mod profile;
mod router;

use std::sync::Arc;

use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    config::RouterConfig,
    error::ServiceError,
    state::invitation::{Invitation, InvitationId, SessionId, UserId},
};

use self::{
    api::InviteApi,
    feed::ChangeFeed,
    machine::{LocalOutcome, ParticipantMachine, ParticipantView},
    profile::ProfileLookup,
    router::{RouterDeps, RouterMessage},
};

/// Failure of a client operation, in protocol terms.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InviteError {
    /// Another transition won first.
    #[error("already resolved: {0}")]
    AlreadyResolved(String),
    /// The local user is not the party allowed to do this.
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    /// The invitation is unknown to the store.
    #[error("not found: {0}")]
    NotFound(String),
    /// The request itself was refused (e.g. inviting oneself).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Network, subscription or storage failure; retrying may help.
    #[error("transport error: {0}")]
    Transport(String),
}

impl InviteError {
    /// Message suitable for the end user, phrased around what happened to the
    /// invitation rather than the guard that refused the operation.
    pub fn user_message(&self) -> &'static str {
        match self {
            InviteError::AlreadyResolved(_) => "This invite was already handled.",
            InviteError::NotFound(_) => "This invite is no longer available.",
            InviteError::NotAuthorized(_) | InviteError::InvalidInput(_) => {
                "Something went wrong with this invite."
            }
            InviteError::Transport(_) => "Connection problem. Please try again.",
        }
    }

    /// Whether the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InviteError::Transport(_))
    }
}

impl From<ServiceError> for InviteError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::AlreadyResolved(message) => InviteError::AlreadyResolved(message),
            ServiceError::NotAuthorized(message) => InviteError::NotAuthorized(message),
            ServiceError::NotFound(message) => InviteError::NotFound(message),
            ServiceError::InvalidInput(message) => InviteError::InvalidInput(message),
            other @ (ServiceError::Unavailable(_)
            | ServiceError::Degraded
            | ServiceError::Timeout) => InviteError::Transport(other.to_string()),
        }
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for InviteError {
    fn from(err: reqwest::Error) -> Self {
        InviteError::Transport(err.to_string())
    }
}

/// Handle of one participant: runs the operations and exposes the reconciled view.
///
/// Operation results are applied to the view before the call returns. A failed
/// operation never moves the view by assumption: `AlreadyResolved` re-fetches the
/// canonical row and `NotFound` clears the stale view.
pub struct InviteClient {
    user_id: UserId,
    api: Arc<dyn InviteApi>,
    inbox: mpsc::Sender<RouterMessage>,
    view: watch::Receiver<ParticipantView>,
    router: JoinHandle<()>,
}

impl InviteClient {
    /// Start the event router for `user_id` and subscribe to the change feed.
    pub fn start(
        user_id: impl Into<UserId>,
        api: Arc<dyn InviteApi>,
        feed: Arc<dyn ChangeFeed>,
        profiles: Arc<dyn ProfileLookup>,
        config: RouterConfig,
    ) -> Self {
        let user_id = user_id.into();
        let machine = ParticipantMachine::new(user_id.clone(), config.history_capacity);
        let deps = RouterDeps {
            api: api.clone(),
            feed,
            profiles,
        };
        let (inbox, view, router) = router::spawn(machine, deps, config);

        Self {
            user_id,
            api,
            inbox,
            view,
            router,
        }
    }

    /// User this client acts for.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Invite `invitee_id` and start waiting for their answer.
    pub async fn send_invite(&self, invitee_id: &str) -> Result<Invitation, InviteError> {
        let invitation = self
            .api
            .create_invite(self.user_id.clone(), invitee_id.to_owned())
            .await?;
        self.deliver(|ack| RouterMessage::TrackSent {
            row: invitation.clone(),
            ack,
        })
        .await;
        Ok(invitation)
    }

    /// Accept an incoming invitation and return the allocated session.
    pub async fn accept(&self, id: InvitationId) -> Result<SessionId, InviteError> {
        let result = self.api.accept_invite(id, self.user_id.clone()).await;
        let session_id = self.settle(id, result).await?;
        self.deliver(|ack| RouterMessage::Outcome {
            outcome: LocalOutcome::Accepted {
                invitation_id: id,
                session_id,
            },
            ack,
        })
        .await;
        Ok(session_id)
    }

    /// Decline an incoming invitation.
    pub async fn decline(&self, id: InvitationId) -> Result<(), InviteError> {
        let result = self.api.decline_invite(id, self.user_id.clone()).await;
        self.settle(id, result).await?;
        self.deliver(|ack| RouterMessage::Outcome {
            outcome: LocalOutcome::Declined(id),
            ack,
        })
        .await;
        Ok(())
    }

    /// Withdraw a sent invitation.
    pub async fn cancel(&self, id: InvitationId) -> Result<(), InviteError> {
        let result = self.api.cancel_invite(id, self.user_id.clone()).await;
        self.settle(id, result).await?;
        self.deliver(|ack| RouterMessage::Outcome {
            outcome: LocalOutcome::Cancelled(id),
            ack,
        })
        .await;
        Ok(())
    }

    /// Re-fetch the canonical row of `id` and apply it.
    pub async fn refresh(&self, id: InvitationId) -> Result<Invitation, InviteError> {
        match self.api.get_invite(id).await {
            Ok(row) => {
                self.deliver(|ack| RouterMessage::Row {
                    row: row.clone(),
                    ack,
                })
                .await;
                Ok(row)
            }
            Err(err @ InviteError::NotFound(_)) => {
                self.deliver(|ack| RouterMessage::Forget { id, ack }).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Clear every view, e.g. when the user navigates away.
    pub async fn reset(&self) {
        self.deliver(|ack| RouterMessage::Reset { ack }).await;
    }

    /// Current view.
    pub fn view(&self) -> ParticipantView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn subscribe_view(&self) -> watch::Receiver<ParticipantView> {
        self.view.clone()
    }

    /// Wait until the view satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<ParticipantView, InviteError>
    where
        F: FnMut(&ParticipantView) -> bool,
    {
        let mut view = self.view.clone();
        let matched = view
            .wait_for(|current| predicate(current))
            .await
            .map_err(|_| InviteError::Transport("event router stopped".into()))?;
        Ok(matched.clone())
    }

    /// Stop the router and drop the feed subscription.
    pub async fn shutdown(self) {
        let _ = self.inbox.send(RouterMessage::Shutdown).await;
        if let Err(err) = self.router.await {
            warn!(user = %self.user_id, error = %err, "event router terminated abnormally");
        }
    }

    /// Turn guard failures into reconciliation before handing them back.
    async fn settle<T>(
        &self,
        id: InvitationId,
        result: Result<T, InviteError>,
    ) -> Result<T, InviteError> {
        match result {
            Ok(value) => Ok(value),
            Err(err @ InviteError::AlreadyResolved(_)) => {
                debug!(%id, user = %self.user_id, "operation lost the race; re-fetching");
                if let Err(refresh_err) = self.refresh(id).await {
                    warn!(%id, error = %refresh_err, "re-fetch after lost race failed");
                }
                Err(err)
            }
            Err(err @ InviteError::NotFound(_)) => {
                self.deliver(|ack| RouterMessage::Forget { id, ack }).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Send a message to the router and wait until it has been applied.
    async fn deliver(&self, message: impl FnOnce(router::Ack) -> RouterMessage) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inbox.send(message(Some(ack_tx))).await.is_err() {
            warn!(user = %self.user_id, "event router is gone; view not updated");
            return;
        }
        let _ = ack_rx.await;
    }
}
