//! Transition operations as seen from a participant's client.

use futures::future::BoxFuture;

use crate::{
    client::InviteError,
    dto::invite::{CreateInviteRequest, InvitationRecord},
    services::invite_service,
    state::{
        SharedState,
        invitation::{Invitation, InvitationId, SessionId, UserId},
    },
};

/// Remote side of the protocol: the invitation store and its guarded operations.
pub trait InviteApi: Send + Sync {
    /// Open a pending invitation.
    fn create_invite(
        &self,
        inviter_id: UserId,
        invitee_id: UserId,
    ) -> BoxFuture<'static, Result<Invitation, InviteError>>;
    /// Read the canonical row.
    fn get_invite(&self, id: InvitationId) -> BoxFuture<'static, Result<Invitation, InviteError>>;
    /// Accept as the invitee; returns the allocated session.
    fn accept_invite(
        &self,
        id: InvitationId,
        acting_user_id: UserId,
    ) -> BoxFuture<'static, Result<SessionId, InviteError>>;
    /// Decline as the invitee.
    fn decline_invite(
        &self,
        id: InvitationId,
        acting_user_id: UserId,
    ) -> BoxFuture<'static, Result<(), InviteError>>;
    /// Withdraw as the inviter.
    fn cancel_invite(
        &self,
        id: InvitationId,
        acting_user_id: UserId,
    ) -> BoxFuture<'static, Result<(), InviteError>>;
}

fn into_invitation(record: InvitationRecord) -> Result<Invitation, InviteError> {
    Invitation::try_from(record).map_err(|err| InviteError::Transport(err.to_string()))
}

/// In-process access to a server's state, bypassing HTTP.
#[derive(Clone)]
pub struct LocalInviteApi {
    state: SharedState,
}

impl LocalInviteApi {
    /// Wrap the state of a server running in this process.
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl InviteApi for LocalInviteApi {
    fn create_invite(
        &self,
        inviter_id: UserId,
        invitee_id: UserId,
    ) -> BoxFuture<'static, Result<Invitation, InviteError>> {
        let state = self.state.clone();
        Box::pin(async move {
            let request = CreateInviteRequest {
                inviter_id,
                invitee_id,
            };
            let record = invite_service::create_invite(&state, request).await?;
            into_invitation(record)
        })
    }

    fn get_invite(&self, id: InvitationId) -> BoxFuture<'static, Result<Invitation, InviteError>> {
        let state = self.state.clone();
        Box::pin(async move { into_invitation(invite_service::get_invite(&state, id).await?) })
    }

    fn accept_invite(
        &self,
        id: InvitationId,
        acting_user_id: UserId,
    ) -> BoxFuture<'static, Result<SessionId, InviteError>> {
        let state = self.state.clone();
        Box::pin(async move {
            Ok(invite_service::accept_invite(&state, id, &acting_user_id).await?)
        })
    }

    fn decline_invite(
        &self,
        id: InvitationId,
        acting_user_id: UserId,
    ) -> BoxFuture<'static, Result<(), InviteError>> {
        let state = self.state.clone();
        Box::pin(async move {
            Ok(invite_service::decline_invite(&state, id, &acting_user_id).await?)
        })
    }

    fn cancel_invite(
        &self,
        id: InvitationId,
        acting_user_id: UserId,
    ) -> BoxFuture<'static, Result<(), InviteError>> {
        let state = self.state.clone();
        Box::pin(async move {
            Ok(invite_service::cancel_invite(&state, id, &acting_user_id).await?)
        })
    }
}

#[cfg(feature = "http-client")]
pub use self::http::HttpInviteApi;

#[cfg(feature = "http-client")]
mod http {
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use reqwest::{Client, Response, StatusCode};
    use serde::de::DeserializeOwned;

    use super::into_invitation;
    use crate::{
        client::InviteError,
        dto::invite::{AcceptResponse, ActingUserRequest, CreateInviteRequest, InvitationRecord},
        error::ErrorBody,
        state::invitation::{Invitation, InvitationId, SessionId, UserId},
    };

    /// Talks to the REST surface of a remote server.
    #[derive(Clone)]
    pub struct HttpInviteApi {
        client: Client,
        base_url: Arc<str>,
    }

    impl HttpInviteApi {
        /// Target the server rooted at `base_url`.
        pub fn new(client: Client, base_url: &str) -> Self {
            Self {
                client,
                base_url: Arc::from(base_url.trim_end_matches('/')),
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }

        async fn resolve(
            &self,
            id: InvitationId,
            action: &str,
            acting_user_id: UserId,
        ) -> Result<Response, InviteError> {
            let response = self
                .client
                .post(self.url(&format!("/invites/{id}/{action}")))
                .json(&ActingUserRequest { acting_user_id })
                .send()
                .await?;
            check(response).await
        }
    }

    /// Map error statuses onto the protocol's failure kinds.
    async fn check(response: Response) -> Result<Response, InviteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.to_string(),
        };
        Err(match status {
            StatusCode::CONFLICT => InviteError::AlreadyResolved(message),
            StatusCode::FORBIDDEN => InviteError::NotAuthorized(message),
            StatusCode::NOT_FOUND => InviteError::NotFound(message),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                InviteError::InvalidInput(message)
            }
            _ => InviteError::Transport(message),
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, InviteError> {
        Ok(response.json::<T>().await?)
    }

    impl super::InviteApi for HttpInviteApi {
        fn create_invite(
            &self,
            inviter_id: UserId,
            invitee_id: UserId,
        ) -> BoxFuture<'static, Result<Invitation, InviteError>> {
            let api = self.clone();
            Box::pin(async move {
                let response = api
                    .client
                    .post(api.url("/invites"))
                    .json(&CreateInviteRequest {
                        inviter_id,
                        invitee_id,
                    })
                    .send()
                    .await?;
                into_invitation(decode::<InvitationRecord>(check(response).await?).await?)
            })
        }

        fn get_invite(
            &self,
            id: InvitationId,
        ) -> BoxFuture<'static, Result<Invitation, InviteError>> {
            let api = self.clone();
            Box::pin(async move {
                let response = api
                    .client
                    .get(api.url(&format!("/invites/{id}")))
                    .send()
                    .await?;
                into_invitation(decode::<InvitationRecord>(check(response).await?).await?)
            })
        }

        fn accept_invite(
            &self,
            id: InvitationId,
            acting_user_id: UserId,
        ) -> BoxFuture<'static, Result<SessionId, InviteError>> {
            let api = self.clone();
            Box::pin(async move {
                let response = api.resolve(id, "accept", acting_user_id).await?;
                Ok(decode::<AcceptResponse>(response).await?.session_id)
            })
        }

        fn decline_invite(
            &self,
            id: InvitationId,
            acting_user_id: UserId,
        ) -> BoxFuture<'static, Result<(), InviteError>> {
            let api = self.clone();
            Box::pin(async move {
                api.resolve(id, "decline", acting_user_id).await?;
                Ok(())
            })
        }

        fn cancel_invite(
            &self,
            id: InvitationId,
            acting_user_id: UserId,
        ) -> BoxFuture<'static, Result<(), InviteError>> {
            let api = self.clone();
            Box::pin(async move {
                api.resolve(id, "cancel", acting_user_id).await?;
                Ok(())
            })
        }
    }
}
