//! Storage backends for invitation rows.

/// CouchDB backend.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// In-process backend.
pub mod memory;
/// MongoDB backend.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{InvitationEntity, ResolveUpdate};
use crate::dao::storage::StorageResult;

/// Outcome of a write guarded by `status == pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedWrite {
    /// The guard held and the row now carries the update.
    Applied(InvitationEntity),
    /// The row was no longer pending; it is returned unchanged.
    Lost(InvitationEntity),
    /// No row exists under this identifier.
    Missing,
}

/// Abstraction over the durable invitation records.
///
/// `resolve` is the only mutation of an existing row and must behave as a
/// compare-and-swap on the status column: at most one call can ever succeed per row.
pub trait InviteStore: Send + Sync {
    /// Persist a new pending row.
    fn insert(&self, invitation: InvitationEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Load a row by identifier.
    fn find(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<InvitationEntity>>>;
    /// Write `update` only if the stored status is still `pending`.
    fn resolve(
        &self,
        id: Uuid,
        update: ResolveUpdate,
    ) -> BoxFuture<'static, StorageResult<GuardedWrite>>;
    /// Pending rows created strictly before `cutoff`.
    fn list_pending_before(
        &self,
        cutoff: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<InvitationEntity>>>;
    /// Cheap round trip proving the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
