//! Saga coordinator driving purchase transactions to a terminal state.

use std::time::{Duration, Instant};

use common::TransactionId;
use domain::{
    FORWARD_SEQUENCE, FailureClass, StartTransaction, StepKind, StepRecord, Transaction,
    TransactionDetails, TransactionError, TransactionStatus, ValidationError,
};
use serde::Serialize;
use transaction_store::{StoreError, TransactionStore, TransactionStoreExt};

use crate::error::{Result, SagaError};
use crate::executor::{StepExecutor, StepFailure, StepPayload, StepResult};
use crate::idempotency::{IdempotencyGuard, IdempotencyKey};
use crate::planner::CompensationPlanner;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// What a caller gets back from `start`, `resume` and `compensate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SagaReceipt {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub details: TransactionDetails,
    pub error_message: Option<String>,
}

impl From<&Transaction> for SagaReceipt {
    fn from(transaction: &Transaction) -> Self {
        Self {
            transaction_id: transaction.transaction_id(),
            status: transaction.status(),
            details: transaction.details(),
            error_message: transaction.error_message().map(str::to_string),
        }
    }
}

/// Orchestrates purchase sagas.
///
/// The coordinator runs select-product, charge-payment,
/// decrement-inventory and register-purchase in order. The first failure
/// ends the forward phase; the successful steps are then compensated in
/// reverse order. Every step goes through the [`IdempotencyGuard`] and
/// every outcome is written to the store before the next step starts.
///
/// Several callers may drive the same transaction at once (a duplicate
/// start, or a resume racing a live run). All store writes are
/// conditional on the stored status, and the guard hands every caller the
/// same step outcome, so they converge on one result.
pub struct SagaCoordinator<S, E>
where
    S: TransactionStore,
    E: StepExecutor,
{
    store: S,
    executor: E,
    guard: IdempotencyGuard,
    planner: CompensationPlanner,
    step_timeout: Duration,
}

impl<S, E> SagaCoordinator<S, E>
where
    S: TransactionStore,
    E: StepExecutor,
{
    /// Creates a new saga coordinator.
    pub fn new(store: S, executor: E) -> Self {
        Self {
            store,
            executor,
            guard: IdempotencyGuard::new(),
            planner: CompensationPlanner::new(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Sets the per-call timeout applied to every step.
    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// Uses an existing guard, e.g. one shared with another coordinator.
    pub fn with_guard(mut self, guard: IdempotencyGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Validates raw request fields and starts a saga.
    pub async fn submit(
        &self,
        user_ref: &str,
        product_ref: &str,
        amount: &str,
    ) -> Result<SagaReceipt> {
        let command = StartTransaction::new(user_ref, product_ref, amount)?;
        self.start(command).await
    }

    /// Starts a saga and drives it to a terminal state.
    ///
    /// If the transaction ID already exists with the same request, the
    /// call joins that saga: completed steps are replayed, never
    /// re-executed. A different request under the same ID is rejected.
    #[tracing::instrument(skip(self, command), fields(transaction_id = %command.transaction_id))]
    pub async fn start(&self, command: StartTransaction) -> Result<SagaReceipt> {
        let transaction_id = command.transaction_id;

        match self.store.create(Transaction::open(command.clone())).await {
            Ok(_) => {
                metrics::counter!("saga_transactions_started_total").increment(1);
                tracing::info!(
                    user_ref = %command.user_ref,
                    product_ref = %command.product_ref,
                    amount = %command.amount,
                    "saga started"
                );
            }
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self.store.get_required(transaction_id).await?;
                if !existing.matches_request(&command) {
                    return Err(ValidationError::ConflictingRequest(transaction_id).into());
                }
                tracing::info!(status = %existing.status(), "joining existing saga");
            }
            Err(e) => return Err(e.into()),
        }

        let transaction = self.drive(transaction_id).await?;
        Ok(SagaReceipt::from(&transaction))
    }

    /// Returns a snapshot of the transaction.
    pub async fn status(&self, transaction_id: TransactionId) -> Result<Transaction> {
        Ok(self.store.get_required(transaction_id).await?)
    }

    /// Returns every transaction, most recent first.
    pub async fn list(&self) -> Result<Vec<Transaction>> {
        Ok(self.store.list().await?)
    }

    /// Returns the number of known transactions.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.store.count().await?)
    }

    /// Drives a non-terminal transaction to a terminal state.
    ///
    /// Steps already recorded in the store are replayed from their
    /// records. Terminal transactions are returned unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, transaction_id: TransactionId) -> Result<SagaReceipt> {
        let transaction = self.drive(transaction_id).await?;
        Ok(SagaReceipt::from(&transaction))
    }

    /// Re-runs the compensation plan of a transaction.
    ///
    /// A `Compensating` transaction is carried to its terminal state. For a
    /// `Compensated` or `Failed` transaction the plan runs through the
    /// idempotency guard, primed from the stored records, so every action
    /// replays its recorded outcome: the executor is never invoked and the
    /// status does not change.
    #[tracing::instrument(skip(self))]
    pub async fn compensate(&self, transaction_id: TransactionId) -> Result<SagaReceipt> {
        let transaction = self.store.get_required(transaction_id).await?;

        match transaction.status() {
            TransactionStatus::Compensating => {
                self.guard.prime_from(&transaction).await;
                let started = Instant::now();
                let transaction = self.run_compensation(transaction, started).await?;
                Ok(SagaReceipt::from(&transaction))
            }
            TransactionStatus::Compensated | TransactionStatus::Failed => {
                self.guard.prime_from(&transaction).await;
                let payload = StepPayload::from_transaction(&transaction);
                for action in self.planner.plan(transaction.steps()) {
                    let kind = action.compensation;
                    // Only recorded actions run; the guard answers them from the record
                    if !transaction.has_step(kind) {
                        tracing::warn!(step = %kind, "compensation never attempted, not replayed");
                        continue;
                    }
                    let result = self.execute_step(kind, &payload).await;
                    tracing::info!(
                        step = %kind,
                        succeeded = result.is_ok(),
                        "compensation already settled"
                    );
                }
                Ok(SagaReceipt::from(&transaction))
            }
            actual => Err(SagaError::InvalidState {
                expected: "COMPENSATING, COMPENSATED or FAILED".to_string(),
                actual,
            }),
        }
    }

    /// Loads a transaction and runs whichever phases it still needs.
    async fn drive(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let started = Instant::now();
        let mut transaction = self.store.get_required(transaction_id).await?;
        if transaction.is_terminal() {
            return Ok(transaction);
        }

        // Outcomes persisted by an earlier run are replayed, not re-executed
        self.guard.prime_from(&transaction).await;

        if transaction.status().can_begin() {
            transaction = self
                .transition(transaction_id, TransactionStatus::can_begin, |t| t.begin())
                .await?
                .0;
        }
        if transaction.status() == TransactionStatus::InProgress {
            transaction = self.run_forward(transaction, started).await?;
        }
        if transaction.status() == TransactionStatus::Compensating {
            transaction = self.run_compensation(transaction, started).await?;
        }
        Ok(transaction)
    }

    /// Runs the forward steps that have no record yet.
    async fn run_forward(&self, mut transaction: Transaction, started: Instant) -> Result<Transaction> {
        let transaction_id = transaction.transaction_id();

        for kind in FORWARD_SEQUENCE {
            if transaction.status() != TransactionStatus::InProgress {
                return Ok(transaction);
            }
            if transaction.has_step(kind) {
                continue;
            }

            let payload = StepPayload::from_transaction(&transaction);
            match self.execute_step(kind, &payload).await {
                Ok(success) => {
                    let record = StepRecord::success(kind, success.external_reference);
                    transaction = self
                        .transition(
                            transaction_id,
                            TransactionStatus::accepts_forward_steps,
                            move |t| record_once(t, record),
                        )
                        .await?
                        .0;
                }
                Err(failure) => {
                    let reason = format!("{kind} failed ({}): {}", failure.class, failure.reason);
                    let record = StepRecord::failure(kind, failure.class, failure.reason);
                    let (snapshot, compensating) = self
                        .transition(transaction_id, TransactionStatus::can_compensate, move |t| {
                            record_once(t, record)?;
                            for skipped in t.unattempted_forward_steps() {
                                t.record_step(StepRecord::skipped(skipped))?;
                            }
                            t.start_compensation(reason)
                        })
                        .await?;
                    if compensating {
                        tracing::warn!(
                            %transaction_id,
                            step = %kind,
                            failure_class = %failure.class,
                            "forward phase aborted, compensating"
                        );
                    }
                    return Ok(snapshot);
                }
            }
        }

        let (snapshot, completed) = self
            .transition(transaction_id, TransactionStatus::can_complete, |t| {
                t.complete()
            })
            .await?;
        if completed {
            let duration = started.elapsed().as_secs_f64();
            metrics::histogram!("saga_duration_seconds").record(duration);
            metrics::counter!("saga_completed_total").increment(1);
            tracing::info!(%transaction_id, duration, "saga completed successfully");
        }
        Ok(snapshot)
    }

    /// Runs the compensation plan, newest step first.
    ///
    /// A failed compensation does not stop the remaining ones; any failure
    /// ends the transaction in `Failed`.
    async fn run_compensation(&self, transaction: Transaction, started: Instant) -> Result<Transaction> {
        let transaction_id = transaction.transaction_id();
        let plan = self.planner.plan(transaction.steps());
        let mut snapshot = transaction;
        let mut failures = Vec::new();

        for action in plan {
            let payload = StepPayload::from_transaction(&snapshot);
            let kind = action.compensation;
            match self.execute_step(kind, &payload).await {
                Ok(success) => {
                    let record = StepRecord::success(kind, success.external_reference);
                    let forward = action.forward;
                    snapshot = self
                        .transition(
                            transaction_id,
                            TransactionStatus::accepts_compensation_steps,
                            move |t| {
                                record_once(t, record)?;
                                if !t.step(forward).is_some_and(|r| r.compensated) {
                                    t.mark_compensated(forward)?;
                                }
                                Ok(())
                            },
                        )
                        .await?
                        .0;
                }
                Err(failure) => {
                    tracing::error!(
                        %transaction_id,
                        step = %kind,
                        failure_class = %failure.class,
                        reason = %failure.reason,
                        "compensation step failed"
                    );
                    failures.push(format!("{kind} ({}): {}", failure.class, failure.reason));
                    let record = StepRecord::failure(kind, failure.class, failure.reason);
                    snapshot = self
                        .transition(
                            transaction_id,
                            TransactionStatus::accepts_compensation_steps,
                            move |t| record_once(t, record),
                        )
                        .await?
                        .0;
                }
            }
        }

        let duration = started.elapsed().as_secs_f64();
        if failures.is_empty() {
            let (snapshot, finished) = self
                .transition(
                    transaction_id,
                    TransactionStatus::can_finish_compensation,
                    |t| t.finish_compensation(),
                )
                .await?;
            if finished {
                metrics::histogram!("saga_duration_seconds").record(duration);
                metrics::counter!("saga_compensated_total").increment(1);
                tracing::warn!(
                    %transaction_id,
                    reason = snapshot.error_message().unwrap_or_default(),
                    "saga compensated"
                );
            }
            Ok(snapshot)
        } else {
            let detail = format!("compensation failed: {}", failures.join("; "));
            let (snapshot, failed) = self
                .transition(
                    transaction_id,
                    TransactionStatus::can_finish_compensation,
                    move |t| t.fail(detail),
                )
                .await?;
            if failed {
                metrics::histogram!("saga_duration_seconds").record(duration);
                metrics::counter!("saga_failed_total").increment(1);
                tracing::error!(
                    %transaction_id,
                    error_message = snapshot.error_message().unwrap_or_default(),
                    "saga failed with unresolved side effects"
                );
            }
            Ok(snapshot)
        }
    }

    /// Executes one step through the idempotency guard under the step timeout.
    #[tracing::instrument(skip(self, payload), fields(transaction_id = %payload.transaction_id, step = %kind))]
    async fn execute_step(&self, kind: StepKind, payload: &StepPayload) -> StepResult {
        let key = IdempotencyKey::new(payload.transaction_id, kind);
        let timeout = self.step_timeout;
        let step_start = Instant::now();

        let guarded = self
            .guard
            .run(key, || async {
                tracing::info!("saga step started");
                match tokio::time::timeout(timeout, self.executor.execute(kind, payload, timeout))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StepFailure::timed_out(kind, timeout)),
                }
            })
            .await;

        if guarded.replayed {
            metrics::counter!("saga_idempotent_replays_total", "step" => kind.as_str())
                .increment(1);
            tracing::info!("saga step replayed from recorded outcome");
            return guarded.result;
        }

        metrics::histogram!("saga_step_duration_seconds", "step" => kind.as_str())
            .record(step_start.elapsed().as_secs_f64());
        match &guarded.result {
            Ok(success) => {
                tracing::info!(
                    external_reference = success.external_reference.as_deref().unwrap_or_default(),
                    "saga step succeeded"
                );
            }
            Err(failure) => {
                metrics::counter!(
                    "saga_step_failures_total",
                    "step" => kind.as_str(),
                    "class" => failure.class.as_str()
                )
                .increment(1);
                match failure.class {
                    FailureClass::BusinessConflict => tracing::warn!(
                        failure_class = %failure.class,
                        reason = %failure.reason,
                        "saga step rejected by collaborator"
                    ),
                    FailureClass::Transient => tracing::error!(
                        failure_class = %failure.class,
                        reason = %failure.reason,
                        "saga step failed transiently"
                    ),
                }
            }
        }
        guarded.result
    }

    /// Applies `change` if the stored status satisfies `applies`.
    ///
    /// Returns the latest snapshot and whether this call made the change.
    async fn transition<F>(
        &self,
        transaction_id: TransactionId,
        applies: fn(&TransactionStatus) -> bool,
        change: F,
    ) -> Result<(Transaction, bool)>
    where
        F: FnOnce(&mut Transaction) -> std::result::Result<(), TransactionError> + Send,
    {
        let mut applied = false;
        let flag = &mut applied;
        let snapshot = self
            .store
            .update(
                transaction_id,
                Box::new(move |t: &mut Transaction| {
                    if !applies(&t.status()) {
                        return Ok(());
                    }
                    change(t)?;
                    *flag = true;
                    Ok(())
                }),
            )
            .await?;
        Ok((snapshot, applied))
    }
}

/// Appends `record` unless a record of the same kind exists.
fn record_once(
    transaction: &mut Transaction,
    record: StepRecord,
) -> std::result::Result<(), TransactionError> {
    if transaction.has_step(record.step_kind) {
        return Ok(());
    }
    transaction.record_step(record)
}
