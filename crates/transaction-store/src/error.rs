use common::TransactionId;
use domain::TransactionError;
use thiserror::Error;

/// Errors that can occur when interacting with the transaction store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No transaction exists with the given ID.
    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    /// A transaction with the given ID was already created.
    #[error("Transaction already exists: {0}")]
    AlreadyExists(TransactionId),

    /// The mutation was rejected by the aggregate; nothing was written.
    #[error("Update rejected: {0}")]
    Rejected(#[from] TransactionError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for transaction store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
