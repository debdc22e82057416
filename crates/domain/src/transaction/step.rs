//! Saga step kinds, outcomes and records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single action a saga can perform against a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    /// Read the product from the catalog. Nothing to undo.
    SelectProduct,
    /// Charge the user through the payment service.
    ChargePayment,
    /// Decrement product stock in the inventory service.
    DecrementInventory,
    /// Record the purchase in the purchase service.
    RegisterPurchase,
    /// Refund a previous charge.
    RefundPayment,
    /// Cancel a previously registered purchase.
    CancelPurchase,
}

/// Forward steps in the order they run.
pub const FORWARD_SEQUENCE: [StepKind; 4] = [
    StepKind::SelectProduct,
    StepKind::ChargePayment,
    StepKind::DecrementInventory,
    StepKind::RegisterPurchase,
];

impl StepKind {
    /// Returns true for the compensating kinds.
    pub fn is_compensation(&self) -> bool {
        matches!(self, StepKind::RefundPayment | StepKind::CancelPurchase)
    }

    /// Returns the compensating kind for a forward step, if the step is
    /// compensable.
    ///
    /// Product selection is read-only and inventory decrements are
    /// deliberately left uncompensated.
    pub fn compensation(&self) -> Option<StepKind> {
        match self {
            StepKind::ChargePayment => Some(StepKind::RefundPayment),
            StepKind::RegisterPurchase => Some(StepKind::CancelPurchase),
            StepKind::SelectProduct
            | StepKind::DecrementInventory
            | StepKind::RefundPayment
            | StepKind::CancelPurchase => None,
        }
    }

    /// Returns the kebab-case step name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::SelectProduct => "select-product",
            StepKind::ChargePayment => "charge-payment",
            StepKind::DecrementInventory => "decrement-inventory",
            StepKind::RegisterPurchase => "register-purchase",
            StepKind::RefundPayment => "refund-payment",
            StepKind::CancelPurchase => "cancel-purchase",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of an attempted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    Success,
    Failure,
    /// Never attempted because an earlier forward step failed.
    Skipped,
}

/// Classification of a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    /// The collaborator rejected the request (4xx). Not a system fault.
    BusinessConflict,
    /// Server error, transport failure, timeout or malformed response.
    Transient,
}

impl FailureClass {
    /// Returns the class name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::BusinessConflict => "business_conflict",
            FailureClass::Transient => "transient",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attempted action within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Which step this record describes.
    pub step_kind: StepKind,

    /// How the attempt ended.
    pub outcome: StepOutcome,

    /// Identifier returned by the collaborator, if any.
    pub external_reference: Option<String>,

    /// Failure classification, set when `outcome` is `Failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureClass>,

    /// Failure detail reported by the collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set on a successful forward record once its compensation succeeded.
    #[serde(default)]
    pub compensated: bool,

    /// When the attempt was recorded.
    pub attempted_at: DateTime<Utc>,
}

impl StepRecord {
    /// Creates a successful record.
    pub fn success(step_kind: StepKind, external_reference: Option<String>) -> Self {
        Self {
            step_kind,
            outcome: StepOutcome::Success,
            external_reference,
            failure: None,
            error: None,
            compensated: false,
            attempted_at: Utc::now(),
        }
    }

    /// Creates a failed record.
    pub fn failure(step_kind: StepKind, class: FailureClass, reason: impl Into<String>) -> Self {
        Self {
            step_kind,
            outcome: StepOutcome::Failure,
            external_reference: None,
            failure: Some(class),
            error: Some(reason.into()),
            compensated: false,
            attempted_at: Utc::now(),
        }
    }

    /// Creates a record for a step that was never attempted.
    pub fn skipped(step_kind: StepKind) -> Self {
        Self {
            step_kind,
            outcome: StepOutcome::Skipped,
            external_reference: None,
            failure: None,
            error: None,
            compensated: false,
            attempted_at: Utc::now(),
        }
    }

    /// Returns true if the step succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}
