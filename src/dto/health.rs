//! Health-check payload.

use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok", or "degraded" while the invitation store is unreachable.
    pub status: String,
    /// Clients currently attached to the change feed.
    pub feed_subscribers: usize,
}

impl HealthResponse {
    /// Build the payload from the degraded flag and the feed subscriber count.
    pub fn new(degraded: bool, feed_subscribers: usize) -> Self {
        let status = if degraded { "degraded" } else { "ok" };
        Self {
            status: status.to_string(),
            feed_subscribers,
        }
    }
}
