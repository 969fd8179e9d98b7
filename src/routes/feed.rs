use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{services::feed_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/feed/invitations",
    tag = "feed",
    responses((
        status = 200,
        description = "Every invitation insert and update, as `invitation.insert` / `invitation.update` events carrying a ChangeEvent",
        content_type = "text/event-stream",
        body = String
    ))
)]
/// Stream every invitation change to the connected client.
pub async fn invitation_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = feed_service::subscribe(&state);
    info!(
        subscribers = state.feed().subscriber_count(),
        "new invitation feed connection"
    );
    feed_service::to_sse_stream(receiver)
}

/// Configure the change-feed endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/feed/invitations", get(invitation_stream))
}
