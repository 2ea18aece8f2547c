//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A handler spec with the same `(topic, id)` key already exists.
    #[error("handler spec already exists")]
    HandlerSpecExists,

    /// No handler spec exists for the `(topic, id)` key.
    #[error("no handler spec exists")]
    NoHandlerSpecExists,

    /// A stored object's envelope carries a version this build cannot decode.
    #[error("unknown stored object version {0}")]
    UnknownVersion(u32),

    /// The migration backup file already exists; refusing to overwrite it.
    #[error("migration backup {} already exists", .0.display())]
    BackupExists(PathBuf),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage engine: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("storage engine: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("storage engine: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage engine: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("storage engine: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
