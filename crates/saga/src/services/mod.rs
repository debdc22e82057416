//! In-memory collaborator services with fault injection.
//!
//! These stand in for the catalog, payment, inventory and purchase
//! services in tests and embedded setups. [`InMemoryServices`] bundles
//! them behind the [`StepExecutor`] trait.

pub mod catalog;
pub mod inventory;
pub mod payment;
pub mod purchase;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::{Money, StepKind};

pub use catalog::{InMemoryCatalogService, Product};
pub use inventory::InMemoryInventoryService;
pub use payment::InMemoryPaymentService;
pub use purchase::InMemoryPurchaseService;

use crate::executor::{StepExecutor, StepPayload, StepResult, StepSuccess};

/// All four collaborators, dispatched by step kind.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServices {
    pub catalog: InMemoryCatalogService,
    pub payment: InMemoryPaymentService,
    pub inventory: InMemoryInventoryService,
    pub purchase: InMemoryPurchaseService,
    delays: Arc<RwLock<HashMap<StepKind, Duration>>>,
}

impl InMemoryServices {
    /// Creates services with an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists a product in the catalog and puts `stock` units in inventory.
    pub fn stock_product(&self, product_id: &str, price: Money, stock: u32) {
        self.catalog.add_product(product_id, price);
        self.inventory.set_stock(product_id, stock);
    }

    /// Delays every call of `kind` before it reaches the service.
    pub fn set_delay(&self, kind: StepKind, delay: Duration) {
        self.delays
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, delay);
    }

    fn delay(&self, kind: StepKind) -> Option<Duration> {
        self.delays
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
    }
}

#[async_trait]
impl StepExecutor for InMemoryServices {
    async fn execute(&self, kind: StepKind, payload: &StepPayload, _timeout: Duration) -> StepResult {
        if let Some(delay) = self.delay(kind) {
            tokio::time::sleep(delay).await;
        }

        match kind {
            StepKind::SelectProduct => {
                let product = self.catalog.get_product(payload.product_ref.as_str())?;
                Ok(StepSuccess::with_reference(product.product_id))
            }
            StepKind::ChargePayment => {
                let payment_id = self.payment.charge(
                    payload.transaction_id,
                    payload.user_ref.as_str(),
                    payload.amount,
                )?;
                Ok(StepSuccess::with_reference(payment_id))
            }
            StepKind::DecrementInventory => {
                let operation_id = self
                    .inventory
                    .decrement(payload.product_id(), payload.quantity)?;
                Ok(StepSuccess::with_reference(operation_id))
            }
            StepKind::RegisterPurchase => {
                let purchase_id = self.purchase.register(
                    payload.transaction_id,
                    payload.user_ref.as_str(),
                    payload.product_id(),
                    payload.amount,
                )?;
                Ok(StepSuccess::with_reference(purchase_id))
            }
            StepKind::RefundPayment => {
                let payment_id = payload.require_payment_id()?;
                self.payment.refund(payment_id)?;
                Ok(StepSuccess::with_reference(payment_id))
            }
            StepKind::CancelPurchase => {
                let purchase_id = payload.require_purchase_id()?;
                self.purchase.cancel(purchase_id)?;
                Ok(StepSuccess::with_reference(purchase_id))
            }
        }
    }
}
