use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::debug;
use uuid::Uuid;

use crate::dao::{
    invite_store::{GuardedWrite, InviteStore},
    models::{InvitationEntity, InviteStatusEntity, ResolveUpdate},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchInvitationDocument, END_SUFFIX, INVITATION_PREFIX,
        invitation_doc_id,
    },
};

const MAX_CONFLICT_RETRIES: u32 = 8;

/// Outcome of a revision-checked `PUT`.
enum PutOutcome {
    Written,
    Conflict,
}

/// Invitation store backed by a CouchDB database.
///
/// The guarded write is a revision-checked `PUT`; a `409` means another writer won.
#[derive(Clone)]
pub struct CouchInviteStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchInviteStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn ping(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::DatabaseStatus {
                database,
                status: response.status(),
            })
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// `PUT` a document; CouchDB answers `409` when `_rev` is stale (or the
    /// document already exists and no `_rev` was sent).
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<PutOutcome>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => Ok(PutOutcome::Written),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::new();
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let parsed = from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })?;
                documents.push(parsed);
            }
        }

        Ok(documents)
    }

    async fn insert(&self, invitation: InvitationEntity) -> CouchResult<()> {
        let id = invitation.id;
        let document = CouchInvitationDocument::new(invitation);
        match self.put_document(&document.id, &document).await? {
            PutOutcome::Written => Ok(()),
            PutOutcome::Conflict => Err(CouchDaoError::Duplicate { id }),
        }
    }

    async fn find(&self, id: Uuid) -> CouchResult<Option<InvitationEntity>> {
        let document = self
            .get_document::<CouchInvitationDocument>(&invitation_doc_id(id))
            .await?;
        Ok(document.map(|doc| doc.invitation))
    }

    /// Read-check-write loop on the document revision. A `409` means another
    /// writer changed the row in between; re-reading then reports who won.
    async fn resolve(&self, id: Uuid, update: ResolveUpdate) -> CouchResult<GuardedWrite> {
        let doc_id = invitation_doc_id(id);

        for attempt in 0..MAX_CONFLICT_RETRIES {
            let Some(mut document) = self
                .get_document::<CouchInvitationDocument>(&doc_id)
                .await?
            else {
                return Ok(GuardedWrite::Missing);
            };

            if document.invitation.status != InviteStatusEntity::Pending {
                return Ok(GuardedWrite::Lost(document.invitation));
            }

            update.apply_to(&mut document.invitation);
            match self.put_document(&doc_id, &document).await? {
                PutOutcome::Written => return Ok(GuardedWrite::Applied(document.invitation)),
                PutOutcome::Conflict => {
                    debug!(%id, attempt, "revision conflict while resolving invitation");
                }
            }
        }

        Err(CouchDaoError::ConflictRetriesExhausted {
            id,
            attempts: MAX_CONFLICT_RETRIES,
        })
    }

    async fn list_pending_before(&self, cutoff: SystemTime) -> CouchResult<Vec<InvitationEntity>> {
        let documents = self
            .list_documents::<CouchInvitationDocument>(INVITATION_PREFIX)
            .await?;
        Ok(documents
            .into_iter()
            .map(|doc| doc.invitation)
            .filter(|row| row.status == InviteStatusEntity::Pending && row.created_at < cutoff)
            .collect())
    }
}

impl InviteStore for CouchInviteStore {
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
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
