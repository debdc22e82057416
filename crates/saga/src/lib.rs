//! Saga orchestration for the distributed purchase transaction.
//!
//! A purchase spans four collaborators: the catalog, payments, inventory
//! and purchases. [`SagaCoordinator`] runs them in order:
//! 1. Select the product
//! 2. Charge the payment
//! 3. Decrement inventory
//! 4. Register the purchase
//!
//! If any step fails, the successful steps are compensated in reverse
//! order: a registered purchase is cancelled and a charge is refunded.
//! Inventory decrements are never compensated.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod idempotency;
pub mod planner;
pub mod services;
pub mod telemetry;

pub use config::{LogFormat, SagaConfig, ServiceUrls};
pub use coordinator::{SagaCoordinator, SagaReceipt};
pub use error::{Result, SagaError};
pub use executor::{
    HttpStepExecutor, StepExecutor, StepFailure, StepPayload, StepResult, StepSuccess,
};
pub use idempotency::{Guarded, IdempotencyGuard, IdempotencyKey};
pub use planner::{
    CompensationAction, CompensationPlan, CompensationPlanner, CompensationPolicy, PurchasePolicy,
};
pub use services::InMemoryServices;
pub use telemetry::init_tracing;
