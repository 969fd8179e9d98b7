//! Library crate for game-invite-back: the invitation server and the participant client.

/// Participant-side client library.
pub mod client;
/// Server and client configuration.
pub mod config;
/// Persistence layer.
pub mod dao;
/// Wire types.
pub mod dto;
/// Error types.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Business operations and background tasks.
pub mod services;
/// Shared application state and the invitation domain.
pub mod state;
