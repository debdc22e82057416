//! In-memory product catalog.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use domain::{FailureClass, Money};

use crate::executor::StepFailure;

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub product_id: String,
    pub price: Money,
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    products: HashMap<String, Product>,
    lookups: usize,
    fail_on_lookup: Option<FailureClass>,
}

/// In-memory catalog service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogService {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalogService {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    pub fn add_product(&self, product_id: &str, price: Money) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.products.insert(
            product_id.to_string(),
            Product {
                product_id: product_id.to_string(),
                price,
            },
        );
    }

    /// Makes every lookup fail with the given class; `None` restores normal behavior.
    pub fn set_fail_on_lookup(&self, fail: Option<FailureClass>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_lookup = fail;
    }

    /// Returns the number of lookups received.
    pub fn lookup_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookups
    }

    /// Looks up a product. Unknown products are a business conflict.
    pub fn get_product(&self, product_id: &str) -> Result<Product, StepFailure> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.lookups += 1;

        if let Some(class) = state.fail_on_lookup {
            return Err(StepFailure {
                class,
                reason: "Catalog unavailable".to_string(),
            });
        }

        state
            .products
            .get(product_id)
            .cloned()
            .ok_or_else(|| StepFailure::business(format!("Product {product_id} not found")))
    }
}
