//! HTTP route trees.

use axum::Router;

use crate::state::SharedState;

/// Swagger UI and OpenAPI JSON.
pub mod docs;
/// Change-feed SSE endpoint.
pub mod feed;
/// Health check.
pub mod health;
/// Invitation lifecycle endpoints.
pub mod invites;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(feed::router())
        .merge(invites::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
