use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::TransactionId;
use domain::Transaction;
use tokio::sync::{Mutex, RwLock};

use crate::{
    Result, StoreError,
    store::{Mutation, TransactionStore},
};

#[derive(Default)]
struct Registry {
    records: HashMap<TransactionId, Arc<Mutex<Transaction>>>,
    /// Creation order, oldest first.
    order: Vec<TransactionId>,
}

/// In-memory transaction store.
///
/// Each transaction sits behind its own mutex, so a long update on one
/// saga never blocks another. The registry lock is held only for lookups
/// and inserts.
#[derive(Clone, Default)]
pub struct InMemoryTransactionStore {
    registry: Arc<RwLock<Registry>>,
}

impl InMemoryTransactionStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all transactions.
    pub async fn clear(&self) {
        let mut registry = self.registry.write().await;
        registry.records.clear();
        registry.order.clear();
    }

    async fn record(&self, transaction_id: TransactionId) -> Option<Arc<Mutex<Transaction>>> {
        self.registry
            .read()
            .await
            .records
            .get(&transaction_id)
            .cloned()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, transaction: Transaction) -> Result<Transaction> {
        let transaction_id = transaction.transaction_id();
        let mut registry = self.registry.write().await;
        if registry.records.contains_key(&transaction_id) {
            return Err(StoreError::AlreadyExists(transaction_id));
        }
        registry
            .records
            .insert(transaction_id, Arc::new(Mutex::new(transaction.clone())));
        registry.order.push(transaction_id);
        tracing::debug!(%transaction_id, "transaction created");
        Ok(transaction)
    }

    async fn get(&self, transaction_id: TransactionId) -> Result<Option<Transaction>> {
        match self.record(transaction_id).await {
            Some(record) => Ok(Some(record.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        transaction_id: TransactionId,
        mutation: Mutation<'_>,
    ) -> Result<Transaction> {
        let record = self
            .record(transaction_id)
            .await
            .ok_or(StoreError::NotFound(transaction_id))?;

        let mut current = record.lock().await;
        let mut draft = current.clone();
        mutation(&mut draft)?;
        *current = draft;
        Ok(current.clone())
    }

    async fn list(&self) -> Result<Vec<Transaction>> {
        let records: Vec<_> = {
            let registry = self.registry.read().await;
            registry
                .order
                .iter()
                .rev()
                .filter_map(|id| registry.records.get(id).cloned())
                .collect()
        };

        let mut transactions = Vec::with_capacity(records.len());
        for record in records {
            transactions.push(record.lock().await.clone());
        }
        Ok(transactions)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.registry.read().await.records.len())
    }

    async fn delete(&self, transaction_id: TransactionId) -> Result<bool> {
        let mut registry = self.registry.write().await;
        if registry.records.remove(&transaction_id).is_none() {
            return Ok(false);
        }
        registry.order.retain(|id| *id != transaction_id);
        Ok(true)
    }
}
