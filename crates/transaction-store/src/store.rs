use async_trait::async_trait;
use common::TransactionId;
use domain::{Transaction, TransactionError};

use crate::{Result, StoreError};

/// A read-modify-write applied to one transaction under its lock.
///
/// Returning an error discards every change the closure made.
pub type Mutation<'a> =
    Box<dyn FnOnce(&mut Transaction) -> std::result::Result<(), TransactionError> + Send + 'a>;

/// Core trait for transaction store implementations.
///
/// All implementations must be thread-safe (Send + Sync). Updates to a
/// single transaction are mutually exclusive; updates to different
/// transactions may proceed in parallel.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts a new transaction.
    ///
    /// Fails with `AlreadyExists` if the ID is taken; the stored record is
    /// left untouched.
    async fn create(&self, transaction: Transaction) -> Result<Transaction>;

    /// Returns a snapshot of the transaction, if it exists.
    async fn get(&self, transaction_id: TransactionId) -> Result<Option<Transaction>>;

    /// Atomically applies `mutation` to the stored transaction and returns
    /// the new snapshot.
    async fn update(
        &self,
        transaction_id: TransactionId,
        mutation: Mutation<'_>,
    ) -> Result<Transaction>;

    /// Returns every transaction, most recently created first.
    async fn list(&self) -> Result<Vec<Transaction>>;

    /// Returns the number of stored transactions.
    async fn count(&self) -> Result<usize>;

    /// Removes a transaction. Returns false if it did not exist.
    async fn delete(&self, transaction_id: TransactionId) -> Result<bool>;
}

/// Extension trait providing convenience methods for transaction stores.
#[async_trait]
pub trait TransactionStoreExt: TransactionStore {
    /// Returns the transaction or `NotFound`.
    async fn get_required(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.get(transaction_id)
            .await?
            .ok_or(StoreError::NotFound(transaction_id))
    }

    /// Checks if a transaction exists.
    async fn exists(&self, transaction_id: TransactionId) -> Result<bool> {
        Ok(self.get(transaction_id).await?.is_some())
    }
}

// Blanket implementation for all TransactionStore implementations
impl<T: TransactionStore + ?Sized> TransactionStoreExt for T {}
