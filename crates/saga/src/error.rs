//! Saga error types.

use common::TransactionId;
use domain::{TransactionError, TransactionStatus, ValidationError};
use thiserror::Error;
use transaction_store::StoreError;

/// Errors that escape the saga coordinator.
///
/// Forward-step and compensation failures are not errors: they end in a
/// `Compensated` or `Failed` transaction that the caller inspects.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The start request was malformed or conflicts with an existing one.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No transaction exists with the given ID.
    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    /// Transaction is in an invalid state for the requested operation.
    #[error("Invalid transaction state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: String,
        actual: TransactionStatus,
    },

    /// The aggregate refused a state change.
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Transaction store error.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SagaError::NotFound(id),
            StoreError::Rejected(inner) => SagaError::Transaction(inner),
            other => SagaError::Store(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
