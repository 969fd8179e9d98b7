use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{DateTime, doc},
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoInvitationDocument, doc_id},
};
use crate::dao::{
    invite_store::{GuardedWrite, InviteStore},
    models::{InvitationEntity, InviteStatusEntity, ResolveUpdate},
    storage::StorageResult,
};

const INVITATION_COLLECTION_NAME: &str = "invitations";

/// Invitation store backed by a MongoDB collection.
///
/// The guarded write is a single `find_one_and_update` filtered on `status: "pending"`.
#[derive(Clone)]
pub struct MongoInviteStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoInviteStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;

        // The expiry sweeper scans pending rows by age.
        let pending_index = mongodb::IndexModel::builder()
            .keys(doc! {"status": 1, "created_at": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("invitation_status_created_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(pending_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: INVITATION_COLLECTION_NAME,
                index: "status,created_at",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoInvitationDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoInvitationDocument>(INVITATION_COLLECTION_NAME)
    }

    async fn insert(&self, invitation: InvitationEntity) -> MongoResult<()> {
        let id = invitation.id;
        let document: MongoInvitationDocument = invitation.into();
        self.collection()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::InsertInvitation { id, source })?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> MongoResult<Option<InvitationEntity>> {
        let document = self
            .collection()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadInvitation { id, source })?;

        document.map(InvitationEntity::try_from).transpose()
    }

    /// Compare-and-swap on `status`: the filter only matches a pending row, so
    /// concurrent resolutions are serialised by the server and at most one matches.
    async fn resolve(&self, id: Uuid, update: ResolveUpdate) -> MongoResult<GuardedWrite> {
        let collection = self.collection().await;
        let mut filter = doc_id(id);
        filter.insert("status", InviteStatusEntity::Pending.as_str());
        let changes = doc! {
            "$set": {
                "status": update.status.as_str(),
                "session_id": update.session_id.map(|session| session.to_string()),
                "updated_at": DateTime::from_system_time(update.updated_at),
            }
        };

        let applied = collection
            .find_one_and_update(filter, changes)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::ResolveInvitation { id, source })?;

        if let Some(document) = applied {
            return Ok(GuardedWrite::Applied(document.try_into()?));
        }

        match self.find(id).await? {
            Some(current) => Ok(GuardedWrite::Lost(current)),
            None => Ok(GuardedWrite::Missing),
        }
    }

    async fn list_pending_before(&self, cutoff: SystemTime) -> MongoResult<Vec<InvitationEntity>> {
        let documents: Vec<MongoInvitationDocument> = self
            .collection()
            .await
            .find(doc! {
                "status": InviteStatusEntity::Pending.as_str(),
                "created_at": { "$lt": DateTime::from_system_time(cutoff) },
            })
            .await
            .map_err(|source| MongoDaoError::ListPending { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListPending { source })?;

        documents
            .into_iter()
            .map(InvitationEntity::try_from)
            .collect()
    }
}

impl InviteStore for MongoInviteStore {
    fn insert(&self, invitation: InvitationEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert(invitation).await.map_err(Into::into) })
    }

    fn find(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<InvitationEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find(id).await.map_err(Into::into) })
    }

    fn resolve(
        &self,
        id: Uuid,
        update: ResolveUpdate,
    ) -> BoxFuture<'static, StorageResult<GuardedWrite>> {
        let store = self.clone();
        Box::pin(async move { store.resolve(id, update).await.map_err(Into::into) })
    }

    fn list_pending_before(
        &self,
        cutoff: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<InvitationEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_pending_before(cutoff).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
