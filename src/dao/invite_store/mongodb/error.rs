use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias of the MongoDB store.
pub type MongoResult<T> = Result<T, MongoDaoError>;

/// Failures raised by the MongoDB invitation store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// `MONGO_URI` or a related variable is not set.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// The connection string was rejected by the driver.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The driver could not build a client.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// The server never answered during startup.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    /// A periodic health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// Index creation failed.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    /// Writing a new row failed.
    #[error("failed to insert invitation {id}")]
    InsertInvitation {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// Reading a row failed.
    #[error("failed to load invitation {id}")]
    LoadInvitation {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// The guarded update failed.
    #[error("failed to resolve invitation {id}")]
    ResolveInvitation {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// Scanning for stale pending rows failed.
    #[error("failed to list pending invitations")]
    ListPending {
        #[source]
        source: MongoError,
    },
    /// A stored document could not be decoded.
    #[error("invalid invitation document `{doc_id}`: {reason}")]
    InvalidDocument { doc_id: String, reason: String },
}
