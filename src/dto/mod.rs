//! Wire types of the REST surface and the change feed.

/// Change-feed events.
pub mod feed;
/// Health-check payload.
pub mod health;
/// Invitation requests and records.
pub mod invite;
/// Shared field validators.
pub mod validation;
