//! Transaction aggregate implementation.

use chrono::{DateTime, Utc};
use common::TransactionId;
use serde::{Deserialize, Serialize};

use super::{
    FORWARD_SEQUENCE, Money, ProductRef, StartTransaction, StepKind, StepOutcome, StepRecord,
    TransactionError, TransactionStatus, UserRef,
};

/// Transaction aggregate root.
///
/// One saga instance: the validated request, the status, and the
/// append-only list of step records. Mutated only by the coordinator and
/// immutable once a terminal status is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    transaction_id: TransactionId,
    status: TransactionStatus,
    user_ref: UserRef,
    product_ref: ProductRef,
    amount: Money,
    steps: Vec<StepRecord>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

/// External references collected by the forward steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub product_id: Option<String>,
    pub payment_id: Option<String>,
    pub inventory_operation_id: Option<String>,
    pub purchase_id: Option<String>,
}

// Query methods
impl Transaction {
    /// Returns the transaction ID.
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Returns the current status.
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Returns the purchasing user.
    pub fn user_ref(&self) -> &UserRef {
        &self.user_ref
    }

    /// Returns the product being purchased.
    pub fn product_ref(&self) -> &ProductRef {
        &self.product_ref
    }

    /// Returns the amount charged.
    pub fn amount(&self) -> Money {
        self.amount
    }

    /// Returns every step record in insertion order.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns true if the transaction can no longer change.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the record for a step kind, if one exists.
    pub fn step(&self, kind: StepKind) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_kind == kind)
    }

    /// Returns true if a record for the step kind exists.
    pub fn has_step(&self, kind: StepKind) -> bool {
        self.step(kind).is_some()
    }

    /// Returns the external reference of a successful step.
    pub fn external_reference(&self, kind: StepKind) -> Option<&str> {
        self.step(kind)
            .filter(|s| s.is_success())
            .and_then(|s| s.external_reference.as_deref())
    }

    /// Returns the successful forward records in the order they ran.
    pub fn successful_forward_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|s| !s.step_kind.is_compensation() && s.is_success())
    }

    /// Returns the forward steps that have no record yet.
    pub fn unattempted_forward_steps(&self) -> Vec<StepKind> {
        FORWARD_SEQUENCE
            .into_iter()
            .filter(|kind| !self.has_step(*kind))
            .collect()
    }

    /// Returns true if the transaction was created from an equivalent request.
    pub fn matches_request(&self, command: &StartTransaction) -> bool {
        self.transaction_id == command.transaction_id
            && self.user_ref == command.user_ref
            && self.product_ref == command.product_ref
            && self.amount == command.amount
    }

    /// Returns the external references collected so far.
    pub fn details(&self) -> TransactionDetails {
        let reference = |kind| self.external_reference(kind).map(str::to_string);
        TransactionDetails {
            product_id: reference(StepKind::SelectProduct),
            payment_id: reference(StepKind::ChargePayment),
            inventory_operation_id: reference(StepKind::DecrementInventory),
            purchase_id: reference(StepKind::RegisterPurchase),
        }
    }
}

// Command methods
impl Transaction {
    /// Creates a pending transaction from a validated start request.
    pub fn open(command: StartTransaction) -> Self {
        Self {
            transaction_id: command.transaction_id,
            status: TransactionStatus::Pending,
            user_ref: command.user_ref,
            product_ref: command.product_ref,
            amount: command.amount,
            steps: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    /// Moves the transaction from `Pending` to `InProgress`.
    pub fn begin(&mut self) -> Result<(), TransactionError> {
        self.ensure_not_terminal()?;
        if !self.status.can_begin() {
            return Err(self.invalid("begin"));
        }
        self.status = TransactionStatus::InProgress;
        Ok(())
    }

    /// Appends a step record.
    ///
    /// Forward records are accepted only while `InProgress`, compensation
    /// records only while `Compensating`. Each kind is recorded once.
    pub fn record_step(&mut self, record: StepRecord) -> Result<(), TransactionError> {
        self.ensure_not_terminal()?;
        let accepted = if record.step_kind.is_compensation() {
            self.status.accepts_compensation_steps()
        } else {
            self.status.accepts_forward_steps()
        };
        if !accepted {
            return Err(self.invalid("record step"));
        }
        if self.has_step(record.step_kind) {
            return Err(TransactionError::DuplicateStep(record.step_kind));
        }
        self.steps.push(record);
        Ok(())
    }

    /// Marks the transaction `Completed` once every forward step succeeded.
    pub fn complete(&mut self) -> Result<(), TransactionError> {
        self.ensure_not_terminal()?;
        if !self.status.can_complete() {
            return Err(self.invalid("complete"));
        }
        if let Some(kind) = FORWARD_SEQUENCE
            .into_iter()
            .find(|kind| !self.step(*kind).is_some_and(StepRecord::is_success))
        {
            return Err(TransactionError::IncompleteForwardPhase(kind));
        }
        self.status = TransactionStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Ends the forward phase after a failure and enters `Compensating`.
    pub fn start_compensation(&mut self, reason: impl Into<String>) -> Result<(), TransactionError> {
        self.ensure_not_terminal()?;
        if !self.status.can_compensate() {
            return Err(self.invalid("start compensation"));
        }
        self.status = TransactionStatus::Compensating;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Flags a successful forward record as compensated.
    pub fn mark_compensated(&mut self, kind: StepKind) -> Result<(), TransactionError> {
        self.ensure_not_terminal()?;
        if !self.status.accepts_compensation_steps() {
            return Err(self.invalid("mark compensated"));
        }
        let record = self
            .steps
            .iter_mut()
            .find(|s| s.step_kind == kind && s.outcome == StepOutcome::Success)
            .ok_or(TransactionError::StepNotSucceeded(kind))?;
        record.compensated = true;
        Ok(())
    }

    /// Marks the transaction `Compensated`.
    pub fn finish_compensation(&mut self) -> Result<(), TransactionError> {
        self.ensure_not_terminal()?;
        if !self.status.can_finish_compensation() {
            return Err(self.invalid("finish compensation"));
        }
        self.status = TransactionStatus::Compensated;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Marks the transaction `Failed` after a compensation failure.
    ///
    /// The detail is appended to the error message recorded when
    /// compensation started.
    pub fn fail(&mut self, detail: impl Into<String>) -> Result<(), TransactionError> {
        self.ensure_not_terminal()?;
        if !self.status.can_finish_compensation() {
            return Err(self.invalid("fail"));
        }
        let detail = detail.into();
        self.error_message = Some(match self.error_message.take() {
            Some(existing) => format!("{existing}; {detail}"),
            None => detail,
        });
        self.status = TransactionStatus::Failed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_not_terminal(&self) -> Result<(), TransactionError> {
        if self.status.is_terminal() {
            return Err(TransactionError::TerminalTransaction {
                transaction_id: self.transaction_id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> TransactionError {
        TransactionError::InvalidStateTransition {
            current: self.status,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::FailureClass;

    fn open_transaction() -> Transaction {
        Transaction::open(StartTransaction::new("u1", "p1", "99.99").unwrap())
    }

    fn succeed(txn: &mut Transaction, kind: StepKind, reference: &str) {
        txn.record_step(StepRecord::success(kind, Some(reference.to_string())))
            .unwrap();
    }

    #[test]
    fn test_open_is_pending() {
        let txn = open_transaction();
        assert_eq!(txn.status(), TransactionStatus::Pending);
        assert!(txn.steps().is_empty());
        assert!(txn.completed_at().is_none());
        assert!(txn.error_message().is_none());
    }

    #[test]
    fn test_full_forward_lifecycle() {
        let mut txn = open_transaction();
        txn.begin().unwrap();
        succeed(&mut txn, StepKind::SelectProduct, "p1");
        succeed(&mut txn, StepKind::ChargePayment, "PAY-0001");
        succeed(&mut txn, StepKind::DecrementInventory, "INV-0001");
        succeed(&mut txn, StepKind::RegisterPurchase, "PUR-0001");
        txn.complete().unwrap();

        assert_eq!(txn.status(), TransactionStatus::Completed);
        assert!(txn.completed_at().is_some());
        let details = txn.details();
        assert_eq!(details.payment_id.as_deref(), Some("PAY-0001"));
        assert_eq!(details.purchase_id.as_deref(), Some("PUR-0001"));
    }

    #[test]
    fn test_cannot_complete_with_missing_steps() {
        let mut txn = open_transaction();
        txn.begin().unwrap();
        succeed(&mut txn, StepKind::SelectProduct, "p1");
        assert_eq!(
            txn.complete(),
            Err(TransactionError::IncompleteForwardPhase(
                StepKind::ChargePayment
            ))
        );
    }

    #[test]
    fn test_forward_steps_require_in_progress() {
        let mut txn = open_transaction();
        let result = txn.record_step(StepRecord::success(StepKind::SelectProduct, None));
        assert!(matches!(
            result,
            Err(TransactionError::InvalidStateTransition {
                current: TransactionStatus::Pending,
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut txn = open_transaction();
        txn.begin().unwrap();
        succeed(&mut txn, StepKind::SelectProduct, "p1");
        assert_eq!(
            txn.record_step(StepRecord::success(StepKind::SelectProduct, None)),
            Err(TransactionError::DuplicateStep(StepKind::SelectProduct))
        );
    }

    #[test]
    fn test_compensation_records_only_while_compensating() {
        let mut txn = open_transaction();
        txn.begin().unwrap();
        succeed(&mut txn, StepKind::SelectProduct, "p1");
        succeed(&mut txn, StepKind::ChargePayment, "PAY-0001");
        assert!(
            txn.record_step(StepRecord::success(StepKind::RefundPayment, None))
                .is_err()
        );

        txn.record_step(StepRecord::failure(
            StepKind::DecrementInventory,
            FailureClass::BusinessConflict,
            "out of stock",
        ))
        .unwrap();
        txn.start_compensation("decrement-inventory failed").unwrap();

        assert!(
            txn.record_step(StepRecord::skipped(StepKind::RegisterPurchase))
                .is_err()
        );
        txn.record_step(StepRecord::success(
            StepKind::RefundPayment,
            Some("PAY-0001".into()),
        ))
        .unwrap();
        txn.mark_compensated(StepKind::ChargePayment).unwrap();
        txn.finish_compensation().unwrap();

        assert_eq!(txn.status(), TransactionStatus::Compensated);
        assert!(txn.step(StepKind::ChargePayment).unwrap().compensated);
        assert_eq!(txn.error_message(), Some("decrement-inventory failed"));
    }

    #[test]
    fn test_fail_appends_detail() {
        let mut txn = open_transaction();
        txn.begin().unwrap();
        txn.start_compensation("charge-payment failed").unwrap();
        txn.fail("compensation failed: refund-payment").unwrap();

        assert_eq!(txn.status(), TransactionStatus::Failed);
        assert_eq!(
            txn.error_message(),
            Some("charge-payment failed; compensation failed: refund-payment")
        );
        assert!(txn.completed_at().is_some());
    }

    #[test]
    fn test_terminal_transaction_is_immutable() {
        let mut txn = open_transaction();
        txn.begin().unwrap();
        txn.start_compensation("boom").unwrap();
        txn.finish_compensation().unwrap();

        let before = txn.clone();
        assert!(matches!(
            txn.record_step(StepRecord::success(StepKind::CancelPurchase, None)),
            Err(TransactionError::TerminalTransaction { .. })
        ));
        assert!(txn.fail("late").is_err());
        assert!(txn.begin().is_err());
        assert_eq!(txn, before);
    }

    #[test]
    fn test_mark_compensated_requires_success() {
        let mut txn = open_transaction();
        txn.begin().unwrap();
        txn.start_compensation("boom").unwrap();
        assert_eq!(
            txn.mark_compensated(StepKind::ChargePayment),
            Err(TransactionError::StepNotSucceeded(StepKind::ChargePayment))
        );
    }

    #[test]
    fn test_unattempted_forward_steps() {
        let mut txn = open_transaction();
        txn.begin().unwrap();
        succeed(&mut txn, StepKind::SelectProduct, "p1");
        assert_eq!(
            txn.unattempted_forward_steps(),
            vec![
                StepKind::ChargePayment,
                StepKind::DecrementInventory,
                StepKind::RegisterPurchase
            ]
        );
    }

    #[test]
    fn test_matches_request() {
        let cmd = StartTransaction::new("u1", "p1", "10.00").unwrap();
        let txn = Transaction::open(cmd.clone());
        assert!(txn.matches_request(&cmd));

        let other = StartTransaction::new("u1", "p1", "10.01")
            .unwrap()
            .with_transaction_id(cmd.transaction_id);
        assert!(!txn.matches_request(&other));
    }

    #[test]
    fn test_serialization() {
        let mut txn = open_transaction();
        txn.begin().unwrap();
        succeed(&mut txn, StepKind::SelectProduct, "p1");

        let json = serde_json::to_string(&txn).unwrap();
        let restored: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, txn);
    }
}
