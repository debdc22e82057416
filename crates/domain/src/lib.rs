//! Domain layer for the saga orchestration engine.
//!
//! This crate provides:
//! - The `Transaction` aggregate and its status state machine
//! - `StepRecord`s describing each attempted saga step
//! - The fixed forward step sequence and the compensation policy
//! - Validated start requests (`StartTransaction`)

pub mod error;
pub mod transaction;

pub use common::TransactionId;
pub use error::ValidationError;
pub use transaction::{
    FORWARD_SEQUENCE, FailureClass, Money, ProductRef, StartTransaction, StepKind, StepOutcome,
    StepRecord, Transaction, TransactionDetails, TransactionError, TransactionStatus, UserRef,
};
