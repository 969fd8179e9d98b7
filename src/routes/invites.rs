use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::invite::{AcceptResponse, ActingUserRequest, CreateInviteRequest, InvitationRecord},
    error::{AppError, ErrorBody},
    services::invite_service,
    state::SharedState,
};

/// Invitation lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/invites", post(create_invite))
        .route("/invites/{id}", get(get_invite))
        .route("/invites/{id}/accept", post(accept_invite))
        .route("/invites/{id}/decline", post(decline_invite))
        .route("/invites/{id}/cancel", post(cancel_invite))
}

/// Open a pending invitation from `inviter_id` to `invitee_id`.
#[utoipa::path(
    post,
    path = "/invites",
    tag = "invites",
    request_body = CreateInviteRequest,
    responses(
        (status = 201, description = "Invitation created", body = InvitationRecord),
        (status = 400, description = "Invalid participants", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    )
)]
pub async fn create_invite(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateInviteRequest>>,
) -> Result<(StatusCode, Json<InvitationRecord>), AppError> {
    let record = invite_service::create_invite(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Fetch the canonical row of an invitation.
#[utoipa::path(
    get,
    path = "/invites/{id}",
    tag = "invites",
    params(("id" = Uuid, Path, description = "Invitation identifier")),
    responses(
        (status = 200, description = "Current invitation row", body = InvitationRecord),
        (status = 404, description = "Unknown invitation", body = ErrorBody)
    )
)]
pub async fn get_invite(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvitationRecord>, AppError> {
    let record = invite_service::get_invite(&state, id).await?;
    Ok(Json(record))
}

/// Accept a pending invitation; only its invitee may do so.
#[utoipa::path(
    post,
    path = "/invites/{id}/accept",
    tag = "invites",
    params(("id" = Uuid, Path, description = "Invitation identifier")),
    request_body = ActingUserRequest,
    responses(
        (status = 200, description = "Accepted; a session was allocated", body = AcceptResponse),
        (status = 403, description = "Acting user is not the invitee", body = ErrorBody),
        (status = 404, description = "Unknown invitation", body = ErrorBody),
        (status = 409, description = "Invitation already resolved", body = ErrorBody)
    )
)]
pub async fn accept_invite(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ActingUserRequest>>,
) -> Result<Json<AcceptResponse>, AppError> {
    let session_id = invite_service::accept_invite(&state, id, &payload.acting_user_id).await?;
    Ok(Json(AcceptResponse { session_id }))
}

/// Decline a pending invitation; only its invitee may do so.
#[utoipa::path(
    post,
    path = "/invites/{id}/decline",
    tag = "invites",
    params(("id" = Uuid, Path, description = "Invitation identifier")),
    request_body = ActingUserRequest,
    responses(
        (status = 204, description = "Declined"),
        (status = 403, description = "Acting user is not the invitee", body = ErrorBody),
        (status = 404, description = "Unknown invitation", body = ErrorBody),
        (status = 409, description = "Invitation already resolved", body = ErrorBody)
    )
)]
pub async fn decline_invite(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ActingUserRequest>>,
) -> Result<StatusCode, AppError> {
    invite_service::decline_invite(&state, id, &payload.acting_user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Withdraw a pending invitation; only its inviter may do so.
#[utoipa::path(
    post,
    path = "/invites/{id}/cancel",
    tag = "invites",
    params(("id" = Uuid, Path, description = "Invitation identifier")),
    request_body = ActingUserRequest,
    responses(
        (status = 204, description = "Cancelled"),
        (status = 403, description = "Acting user is not the inviter", body = ErrorBody),
        (status = 404, description = "Unknown invitation", body = ErrorBody),
        (status = 409, description = "Invitation already resolved", body = ErrorBody)
    )
)]
pub async fn cancel_invite(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ActingUserRequest>>,
) -> Result<StatusCode, AppError> {
    invite_service::cancel_invite(&state, id, &payload.acting_user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
