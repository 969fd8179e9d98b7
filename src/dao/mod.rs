/// Invitation storage backends and the guarded-write contract.
pub mod invite_store;
/// Database model definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
