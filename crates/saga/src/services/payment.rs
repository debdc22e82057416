//! In-memory payment service.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use common::TransactionId;
use domain::{FailureClass, Money};

use crate::executor::StepFailure;

#[derive(Debug, Clone)]
struct Payment {
    transaction_id: TransactionId,
    amount: Money,
    refunded: bool,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, Payment>,
    next_id: u32,
    charge_calls: usize,
    refund_calls: usize,
    fail_on_charge: Option<FailureClass>,
    fail_on_refund: Option<FailureClass>,
}

/// In-memory payment service for testing.
///
/// Refunds are accepted idempotently, including for unknown payments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes charges fail with the given class; `None` restores normal behavior.
    pub fn set_fail_on_charge(&self, fail: Option<FailureClass>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_charge = fail;
    }

    /// Makes refunds fail with the given class; `None` restores normal behavior.
    pub fn set_fail_on_refund(&self, fail: Option<FailureClass>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_refund = fail;
    }

    /// Returns the number of charge requests received, failed ones included.
    pub fn charge_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .charge_calls
    }

    /// Returns the number of refund requests received, failed ones included.
    pub fn refund_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refund_calls
    }

    /// Returns the number of charged, unrefunded payments.
    pub fn payment_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .values()
            .filter(|p| !p.refunded)
            .count()
    }

    /// Returns true if the payment exists and was refunded.
    pub fn is_refunded(&self, payment_id: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .get(payment_id)
            .is_some_and(|p| p.refunded)
    }

    /// Returns the number of payments charged for a transaction.
    pub fn charges_for(&self, transaction_id: TransactionId) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .values()
            .filter(|p| p.transaction_id == transaction_id)
            .count()
    }

    /// Returns the total amount charged and not refunded.
    pub fn balance(&self) -> Money {
        let cents = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .values()
            .filter(|p| !p.refunded)
            .map(|p| p.amount.cents())
            .sum();
        Money::from_cents(cents)
    }

    /// Charges a user. Returns the new payment ID.
    pub fn charge(
        &self,
        transaction_id: TransactionId,
        user_ref: &str,
        amount: Money,
    ) -> Result<String, StepFailure> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.charge_calls += 1;

        if let Some(class) = state.fail_on_charge {
            return Err(StepFailure {
                class,
                reason: "Payment declined".to_string(),
            });
        }
        if user_ref.trim().is_empty() || !amount.is_positive() {
            return Err(StepFailure::business("user_id and a positive amount are required"));
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state.payments.insert(
            payment_id.clone(),
            Payment {
                transaction_id,
                amount,
                refunded: false,
            },
        );
        Ok(payment_id)
    }

    /// Refunds a payment.
    pub fn refund(&self, payment_id: &str) -> Result<(), StepFailure> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.refund_calls += 1;

        if let Some(class) = state.fail_on_refund {
            return Err(StepFailure {
                class,
                reason: "Refund unavailable".to_string(),
            });
        }

        if let Some(payment) = state.payments.get_mut(payment_id) {
            payment.refunded = true;
        }
        Ok(())
    }
}
