//! Transaction aggregate and related types.

mod aggregate;
mod commands;
mod state;
mod step;
mod value_objects;

pub use aggregate::{Transaction, TransactionDetails};
pub use commands::StartTransaction;
pub use state::TransactionStatus;
pub use step::{FORWARD_SEQUENCE, FailureClass, StepKind, StepOutcome, StepRecord};
pub use value_objects::{Money, ProductRef, UserRef};

use common::TransactionId;
use thiserror::Error;

/// Errors that can occur while mutating a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The transaction is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidStateTransition {
        current: TransactionStatus,
        action: &'static str,
    },

    /// The transaction reached a terminal state and is immutable.
    #[error("Transaction {transaction_id} is terminal ({status})")]
    TerminalTransaction {
        transaction_id: TransactionId,
        status: TransactionStatus,
    },

    /// A record for this step kind already exists.
    #[error("Step {0} is already recorded")]
    DuplicateStep(StepKind),

    /// Completion requested while a forward step has not succeeded.
    #[error("Cannot complete: step {0} has not succeeded")]
    IncompleteForwardPhase(StepKind),

    /// No successful forward record exists for the step.
    #[error("No successful record for step {0}")]
    StepNotSucceeded(StepKind),
}
