//! Request validation errors.

use common::TransactionId;
use thiserror::Error;

/// Errors raised while validating a saga start request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The user reference is missing or blank.
    #[error("user reference is required")]
    MissingUserRef,

    /// The product reference is missing or blank.
    #[error("product reference is required")]
    MissingProductRef,

    /// The amount is not a decimal with at most two fractional digits.
    #[error("invalid amount '{0}': expected a decimal with at most two fractional digits")]
    InvalidAmount(String),

    /// The amount is zero or negative.
    #[error("amount must be greater than zero, got '{0}'")]
    NonPositiveAmount(String),

    /// A transaction with this ID exists with a different request.
    #[error("transaction {0} already exists with a different request")]
    ConflictingRequest(TransactionId),
}
