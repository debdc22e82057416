//! Idempotent step invocation keyed by `(transaction, step)`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use common::TransactionId;
use domain::{FailureClass, StepKind, StepOutcome, Transaction};
use tokio::sync::Mutex;

use crate::executor::{StepFailure, StepResult, StepSuccess};

/// Identity of one side-effecting step invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub transaction_id: TransactionId,
    pub step_kind: StepKind,
}

impl IdempotencyKey {
    pub fn new(transaction_id: TransactionId, step_kind: StepKind) -> Self {
        Self {
            transaction_id,
            step_kind,
        }
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "saga:{}:step:{}", self.transaction_id, self.step_kind)
    }
}

/// Result of a guarded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guarded {
    pub result: StepResult,
    /// True when the result came from an earlier invocation.
    pub replayed: bool,
}

type Slot = Arc<Mutex<Option<StepResult>>>;

/// Ensures each `(transaction, step)` pair reaches its collaborator at
/// most once.
///
/// The first caller for a key runs the call while holding the key's slot;
/// concurrent callers wait on the slot and then receive the recorded
/// result. Both successes and failures are recorded. Entries live until
/// [`IdempotencyGuard::forget`] is called.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyGuard {
    slots: Arc<Mutex<HashMap<IdempotencyKey, Slot>>>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, key: IdempotencyKey) -> Slot {
        self.slots.lock().await.entry(key).or_default().clone()
    }

    /// Runs `call` unless a result for `key` is already recorded.
    pub async fn run<F, Fut>(&self, key: IdempotencyKey, call: F) -> Guarded
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StepResult>,
    {
        let slot = self.slot(key).await;
        let mut recorded = slot.lock().await;
        if let Some(result) = recorded.as_ref() {
            tracing::debug!(%key, "replaying recorded step result");
            return Guarded {
                result: result.clone(),
                replayed: true,
            };
        }

        let result = call().await;
        *recorded = Some(result.clone());
        Guarded {
            result,
            replayed: false,
        }
    }

    /// Records `result` for `key` unless one is already recorded.
    ///
    /// Returns true if the result was stored.
    pub async fn prime(&self, key: IdempotencyKey, result: StepResult) -> bool {
        let slot = self.slot(key).await;
        let mut recorded = slot.lock().await;
        if recorded.is_some() {
            return false;
        }
        *recorded = Some(result);
        true
    }

    /// Records the outcome of every attempted step of a persisted
    /// transaction, so a resumed saga replays instead of re-executing.
    ///
    /// Skipped records are ignored. Returns the number of results stored.
    pub async fn prime_from(&self, transaction: &Transaction) -> usize {
        let mut primed = 0;
        for record in transaction.steps() {
            let result = match record.outcome {
                StepOutcome::Success => Ok(StepSuccess {
                    external_reference: record.external_reference.clone(),
                }),
                StepOutcome::Failure => Err(StepFailure {
                    class: record.failure.unwrap_or(FailureClass::Transient),
                    reason: record.error.clone().unwrap_or_default(),
                }),
                StepOutcome::Skipped => continue,
            };
            let key = IdempotencyKey::new(transaction.transaction_id(), record.step_kind);
            if self.prime(key, result).await {
                primed += 1;
            }
        }
        primed
    }

    /// Returns the recorded result for `key`, if any.
    pub async fn recorded(&self, key: IdempotencyKey) -> Option<StepResult> {
        let slot = self.slots.lock().await.get(&key).cloned()?;
        let recorded = slot.lock().await;
        recorded.clone()
    }

    /// Drops every entry of a transaction. Returns the number removed.
    pub async fn forget(&self, transaction_id: TransactionId) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|key, _| key.transaction_id != transaction_id);
        before - slots.len()
    }

    /// Returns the number of keys seen.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use domain::{StartTransaction, StepRecord};

    fn counting_call(calls: Arc<AtomicUsize>) -> impl Future<Output = StepResult> {
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(StepSuccess::with_reference(format!("REF-{n}")))
        }
    }

    #[test]
    fn test_key_format() {
        let id = TransactionId::new();
        let key = IdempotencyKey::new(id, StepKind::ChargePayment);
        assert_eq!(key.to_string(), format!("saga:{id}:step:charge-payment"));
    }

    #[tokio::test]
    async fn test_second_call_replays() {
        let guard = IdempotencyGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = IdempotencyKey::new(TransactionId::new(), StepKind::ChargePayment);

        let first = guard.run(key, || counting_call(calls.clone())).await;
        let second = guard.run(key, || counting_call(calls.clone())).await;

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.result, second.result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_invocation() {
        let guard = IdempotencyGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = IdempotencyKey::new(TransactionId::new(), StepKind::ChargePayment);

        let (a, b) = tokio::join!(
            guard.run(key, || counting_call(calls.clone())),
            guard.run(key, || counting_call(calls.clone())),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.result, b.result);
        assert!(a.replayed != b.replayed);
    }

    #[tokio::test]
    async fn test_failures_are_recorded() {
        let guard = IdempotencyGuard::new();
        let key = IdempotencyKey::new(TransactionId::new(), StepKind::RefundPayment);

        guard
            .run(key, || async { Err(StepFailure::transient("503")) })
            .await;
        let replay = guard
            .run(key, || async { Ok(StepSuccess::default()) })
            .await;

        assert!(replay.replayed);
        assert_eq!(replay.result, Err(StepFailure::transient("503")));
    }

    #[tokio::test]
    async fn test_distinct_keys_are_independent() {
        let guard = IdempotencyGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = TransactionId::new();

        guard
            .run(IdempotencyKey::new(id, StepKind::ChargePayment), || {
                counting_call(calls.clone())
            })
            .await;
        guard
            .run(IdempotencyKey::new(id, StepKind::RefundPayment), || {
                counting_call(calls.clone())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(guard.len().await, 2);
    }

    #[tokio::test]
    async fn test_prime_from_transaction() {
        let mut txn = Transaction::open(StartTransaction::new("u1", "p1", "5.00").unwrap());
        txn.begin().unwrap();
        txn.record_step(StepRecord::success(StepKind::SelectProduct, Some("p1".into())))
            .unwrap();
        txn.record_step(StepRecord::failure(
            StepKind::ChargePayment,
            FailureClass::BusinessConflict,
            "declined",
        ))
        .unwrap();
        txn.record_step(StepRecord::skipped(StepKind::DecrementInventory))
            .unwrap();

        let guard = IdempotencyGuard::new();
        assert_eq!(guard.prime_from(&txn).await, 2);
        assert_eq!(guard.prime_from(&txn).await, 0);

        let id = txn.transaction_id();
        assert_eq!(
            guard
                .recorded(IdempotencyKey::new(id, StepKind::ChargePayment))
                .await,
            Some(Err(StepFailure::business("declined")))
        );
        assert!(
            guard
                .recorded(IdempotencyKey::new(id, StepKind::DecrementInventory))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_forget_drops_only_one_transaction() {
        let guard = IdempotencyGuard::new();
        let a = TransactionId::new();
        let b = TransactionId::new();
        guard
            .prime(IdempotencyKey::new(a, StepKind::ChargePayment), Ok(StepSuccess::default()))
            .await;
        guard
            .prime(IdempotencyKey::new(b, StepKind::ChargePayment), Ok(StepSuccess::default()))
            .await;

        assert_eq!(guard.forget(a).await, 1);
        assert_eq!(guard.len().await, 1);
        assert!(
            guard
                .recorded(IdempotencyKey::new(b, StepKind::ChargePayment))
                .await
                .is_some()
        );
    }
}
