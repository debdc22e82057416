//! Transaction registry for the saga engine.
//!
//! `TransactionStore` is the only state shared between concurrently
//! running sagas. Writes to one transaction are serialized; different
//! transactions never contend beyond the registry lookup.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryTransactionStore;
pub use postgres::PostgresTransactionStore;
pub use store::{Mutation, TransactionStore, TransactionStoreExt};
