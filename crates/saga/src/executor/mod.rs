//! Single-step execution against downstream collaborators.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use common::TransactionId;
use domain::{FailureClass, Money, ProductRef, StepKind, Transaction, UserRef};
use thiserror::Error;

pub use http::HttpStepExecutor;

/// Everything a step needs to build its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPayload {
    pub transaction_id: TransactionId,
    pub user_ref: UserRef,
    pub product_ref: ProductRef,
    pub amount: Money,
    pub quantity: u32,
    /// Product ID reported by the catalog.
    pub product_id: Option<String>,
    /// Payment ID reported by the charge.
    pub payment_id: Option<String>,
    /// Purchase ID reported by the registration.
    pub purchase_id: Option<String>,
}

impl StepPayload {
    /// Builds the payload from a transaction's request and the references
    /// of its successful steps.
    pub fn from_transaction(transaction: &Transaction) -> Self {
        let reference = |kind| transaction.external_reference(kind).map(str::to_string);
        Self {
            transaction_id: transaction.transaction_id(),
            user_ref: transaction.user_ref().clone(),
            product_ref: transaction.product_ref().clone(),
            amount: transaction.amount(),
            quantity: 1,
            product_id: reference(StepKind::SelectProduct),
            payment_id: reference(StepKind::ChargePayment),
            purchase_id: reference(StepKind::RegisterPurchase),
        }
    }

    /// Returns the catalog product ID, or the requested reference before
    /// the catalog has answered.
    pub fn product_id(&self) -> &str {
        self.product_id
            .as_deref()
            .unwrap_or(self.product_ref.as_str())
    }

    /// Returns the payment to refund.
    pub fn require_payment_id(&self) -> Result<&str, StepFailure> {
        self.payment_id
            .as_deref()
            .ok_or_else(|| StepFailure::business("no payment id to act on"))
    }

    /// Returns the purchase to cancel.
    pub fn require_purchase_id(&self) -> Result<&str, StepFailure> {
        self.purchase_id
            .as_deref()
            .ok_or_else(|| StepFailure::business("no purchase id to act on"))
    }
}

/// A step the collaborator accepted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepSuccess {
    /// Identifier assigned by the collaborator.
    pub external_reference: Option<String>,
}

impl StepSuccess {
    pub fn with_reference(reference: impl Into<String>) -> Self {
        Self {
            external_reference: Some(reference.into()),
        }
    }
}

/// A step that did not succeed, with its classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class}: {reason}")]
pub struct StepFailure {
    pub class: FailureClass,
    pub reason: String,
}

impl StepFailure {
    /// The collaborator rejected the request.
    pub fn business(reason: impl Into<String>) -> Self {
        Self {
            class: FailureClass::BusinessConflict,
            reason: reason.into(),
        }
    }

    /// The call failed for infrastructure reasons.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            reason: reason.into(),
        }
    }

    /// No answer arrived within the per-call timeout.
    pub fn timed_out(kind: StepKind, after: Duration) -> Self {
        Self::transient(format!("{kind} timed out after {}ms", after.as_millis()))
    }
}

/// Outcome of one step invocation.
pub type StepResult = Result<StepSuccess, StepFailure>;

/// Invokes a single downstream operation.
///
/// Implementations make exactly one call to the owning collaborator and
/// classify the result; they never retry and keep no state between calls.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Executes `kind` for the given payload, giving up after `timeout`.
    async fn execute(&self, kind: StepKind, payload: &StepPayload, timeout: Duration) -> StepResult;
}

/// Maps an HTTP status code to a failure class.
///
/// Returns `None` for 2xx. 4xx is a business conflict; everything else
/// is transient.
pub fn classify_status(status: u16) -> Option<FailureClass> {
    match status {
        200..=299 => None,
        400..=499 => Some(FailureClass::BusinessConflict),
        _ => Some(FailureClass::Transient),
    }
}
