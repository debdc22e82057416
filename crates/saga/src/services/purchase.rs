//! In-memory purchase service.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use common::TransactionId;
use domain::{FailureClass, Money};

use crate::executor::StepFailure;

#[derive(Debug, Clone)]
struct Purchase {
    transaction_id: TransactionId,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct InMemoryPurchaseState {
    purchases: HashMap<String, Purchase>,
    next_id: u32,
    register_calls: usize,
    cancel_calls: usize,
    fail_on_register: Option<FailureClass>,
    fail_on_cancel: Option<FailureClass>,
}

/// In-memory purchase service for testing.
///
/// A transaction can be registered once; a second registration is a
/// conflict. Cancellation is accepted idempotently.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPurchaseService {
    state: Arc<RwLock<InMemoryPurchaseState>>,
}

impl InMemoryPurchaseService {
    /// Creates a new in-memory purchase service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes registrations fail with the given class; `None` restores normal behavior.
    pub fn set_fail_on_register(&self, fail: Option<FailureClass>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_register = fail;
    }

    /// Makes cancellations fail with the given class; `None` restores normal behavior.
    pub fn set_fail_on_cancel(&self, fail: Option<FailureClass>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_cancel = fail;
    }

    /// Returns the number of active (not cancelled) purchases.
    pub fn purchase_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .purchases
            .values()
            .filter(|p| !p.cancelled)
            .count()
    }

    /// Returns the number of registration requests received.
    pub fn register_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .register_calls
    }

    /// Returns the number of cancellation requests received.
    pub fn cancel_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_calls
    }

    /// Returns true if the purchase exists and was cancelled.
    pub fn is_cancelled(&self, purchase_id: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .purchases
            .get(purchase_id)
            .is_some_and(|p| p.cancelled)
    }

    /// Registers a purchase. Returns the new purchase ID.
    pub fn register(
        &self,
        transaction_id: TransactionId,
        user_ref: &str,
        product_id: &str,
        amount: Money,
    ) -> Result<String, StepFailure> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.register_calls += 1;

        if let Some(class) = state.fail_on_register {
            return Err(StepFailure {
                class,
                reason: "Purchase rejected".to_string(),
            });
        }
        if user_ref.trim().is_empty() || product_id.trim().is_empty() || !amount.is_positive() {
            return Err(StepFailure::business(
                "user_id, product_id and a positive amount are required",
            ));
        }
        if state
            .purchases
            .values()
            .any(|p| p.transaction_id == transaction_id)
        {
            return Err(StepFailure::business(format!(
                "Purchase for transaction {transaction_id} already registered"
            )));
        }

        state.next_id += 1;
        let purchase_id = format!("PUR-{:04}", state.next_id);
        state.purchases.insert(
            purchase_id.clone(),
            Purchase {
                transaction_id,
                cancelled: false,
            },
        );
        Ok(purchase_id)
    }

    /// Cancels a purchase.
    pub fn cancel(&self, purchase_id: &str) -> Result<(), StepFailure> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.cancel_calls += 1;

        if let Some(class) = state.fail_on_cancel {
            return Err(StepFailure {
                class,
                reason: "Cancellation unavailable".to_string(),
            });
        }

        if let Some(purchase) = state.purchases.get_mut(purchase_id) {
            purchase.cancelled = true;
        }
        Ok(())
    }
}
