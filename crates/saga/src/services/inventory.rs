//! In-memory inventory service.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use domain::FailureClass;

use crate::executor::StepFailure;

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<String, u32>,
    next_id: u32,
    decrement_calls: usize,
    fail_on_decrement: Option<FailureClass>,
}

/// In-memory inventory service for testing.
///
/// There is no restock operation: decrements are never compensated.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stock level of a product.
    pub fn set_stock(&self, product_id: &str, quantity: u32) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .stock
            .insert(product_id.to_string(), quantity);
    }

    /// Returns the stock level of a product.
    pub fn stock(&self, product_id: &str) -> Option<u32> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .stock
            .get(product_id)
            .copied()
    }

    /// Makes decrements fail with the given class; `None` restores normal behavior.
    pub fn set_fail_on_decrement(&self, fail: Option<FailureClass>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_decrement = fail;
    }

    /// Returns the number of decrement requests received.
    pub fn decrement_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .decrement_calls
    }

    /// Removes `quantity` units from stock. Returns an operation ID.
    pub fn decrement(&self, product_id: &str, quantity: u32) -> Result<String, StepFailure> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.decrement_calls += 1;

        if let Some(class) = state.fail_on_decrement {
            return Err(StepFailure {
                class,
                reason: "Inventory unavailable".to_string(),
            });
        }

        let available = state
            .stock
            .get_mut(product_id)
            .ok_or_else(|| StepFailure::business(format!("Product {product_id} not found")))?;
        if *available < quantity {
            return Err(StepFailure::business(format!(
                "Insufficient stock for product {product_id}: {available} available, {quantity} requested"
            )));
        }
        *available -= quantity;

        state.next_id += 1;
        Ok(format!("INV-{:04}", state.next_id))
    }
}
