//! Error type for store operations.

use thiserror::Error;

/// Errors that can occur when using [`Store`](crate::Store).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be created or opened.
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// A read or write transaction could not be started.
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// A bucket could not be opened or created.
    #[error("bucket error: {0}")]
    Table(#[from] redb::TableError),

    /// The engine failed while reading or writing entries.
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    /// A write transaction failed to commit.
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// A blocking store task was cancelled or panicked.
    #[error("background store task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}
