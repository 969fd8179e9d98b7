//! Process-local invitation store, used when no database is configured and in tests.

use std::{sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::{
    invite_store::{GuardedWrite, InviteStore},
    models::{InvitationEntity, InviteStatusEntity, ResolveUpdate},
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
#[error("invitation {0} already exists")]
struct DuplicateId(Uuid);

/// Invitation store keeping rows in a concurrent map.
///
/// The shard lock held by `get_mut` makes the status check and the write of
/// [`InviteStore::resolve`] a single atomic step.
#[derive(Clone, Default)]
pub struct MemoryInviteStore {
    rows: Arc<DashMap<Uuid, InvitationEntity>>,
}

impl MemoryInviteStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_row(&self, invitation: InvitationEntity) -> StorageResult<()> {
        match self.rows.entry(invitation.id) {
            Entry::Occupied(_) => Err(StorageError::unavailable(
                "duplicate invitation id".into(),
                DuplicateId(invitation.id),
            )),
            Entry::Vacant(slot) => {
                slot.insert(invitation);
                Ok(())
            }
        }
    }

    fn resolve_row(&self, id: Uuid, update: &ResolveUpdate) -> GuardedWrite {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return GuardedWrite::Missing;
        };

        if row.status != InviteStatusEntity::Pending {
            return GuardedWrite::Lost(row.clone());
        }

        update.apply_to(&mut row);
        GuardedWrite::Applied(row.clone())
    }
}

impl InviteStore for MemoryInviteStore {
    fn insert(&self, invitation: InvitationEntity) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.insert_row(invitation);
        Box::pin(async move { result })
    }

    fn find(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<InvitationEntity>>> {
        let row = self.rows.get(&id).map(|row| row.clone());
        Box::pin(async move { Ok(row) })
    }

    fn resolve(
        &self,
        id: Uuid,
        update: ResolveUpdate,
    ) -> BoxFuture<'static, StorageResult<GuardedWrite>> {
        let outcome = self.resolve_row(id, &update);
        Box::pin(async move { Ok(outcome) })
    }

    fn list_pending_before(
        &self,
        cutoff: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<InvitationEntity>>> {
        let rows = self
            .rows
            .iter()
            .filter(|row| row.status == InviteStatusEntity::Pending && row.created_at < cutoff)
            .map(|row| row.clone())
            .collect();
        Box::pin(async move { Ok(rows) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
