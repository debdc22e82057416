//! Types shared by every crate in the saga workspace.

pub mod types;

pub use types::{ParseTransactionIdError, TransactionId};
