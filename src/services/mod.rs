/// OpenAPI documentation generation.
pub mod documentation;
/// Background cancellation of invitations left pending too long.
pub mod expiry_service;
/// Server-Sent Events rendition of the invitation change feed.
pub mod feed_service;
/// Health check service.
pub mod health_service;
/// Invitation creation, lookup and the guarded transitions.
pub mod invite_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
