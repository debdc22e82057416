//! Compensation planning.

use domain::{StepKind, StepRecord};

/// One compensating action derived from a successful forward step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationAction {
    /// The forward step being undone.
    pub forward: StepKind,
    /// The step that undoes it.
    pub compensation: StepKind,
    /// Reference returned by the forward step.
    pub external_reference: Option<String>,
}

/// Ordered compensations to run after a forward failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationPlan {
    actions: Vec<CompensationAction>,
}

impl CompensationPlan {
    pub fn actions(&self) -> &[CompensationAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Compensating kinds in execution order.
    pub fn kinds(&self) -> Vec<StepKind> {
        self.actions.iter().map(|a| a.compensation).collect()
    }
}

impl IntoIterator for CompensationPlan {
    type Item = CompensationAction;
    type IntoIter = std::vec::IntoIter<CompensationAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}

/// Decides which forward steps have a compensation.
pub trait CompensationPolicy: Send + Sync {
    fn compensation_for(&self, forward: StepKind) -> Option<StepKind>;
}

/// Refund payments and cancel purchases; leave inventory decremented.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurchasePolicy;

impl CompensationPolicy for PurchasePolicy {
    fn compensation_for(&self, forward: StepKind) -> Option<StepKind> {
        forward.compensation()
    }
}

/// Computes compensation plans from step records.
///
/// Pure: the same records always produce the same plan.
#[derive(Debug, Clone, Default)]
pub struct CompensationPlanner<P = PurchasePolicy> {
    policy: P,
}

impl CompensationPlanner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: CompensationPolicy> CompensationPlanner<P> {
    pub fn with_policy(policy: P) -> Self {
        Self { policy }
    }

    /// Plans compensations for the successful forward steps in `steps`,
    /// newest first, skipping kinds the policy leaves uncompensated.
    pub fn plan(&self, steps: &[StepRecord]) -> CompensationPlan {
        let actions = steps
            .iter()
            .filter(|record| record.is_success() && !record.step_kind.is_compensation())
            .rev()
            .filter_map(|record| {
                let compensation = self.policy.compensation_for(record.step_kind)?;
                Some(CompensationAction {
                    forward: record.step_kind,
                    compensation,
                    external_reference: record.external_reference.clone(),
                })
            })
            .collect();
        CompensationPlan { actions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::FailureClass;

    fn success(kind: StepKind, reference: &str) -> StepRecord {
        StepRecord::success(kind, Some(reference.to_string()))
    }

    #[test]
    fn test_payment_failure_plans_nothing() {
        let steps = vec![
            success(StepKind::SelectProduct, "p1"),
            StepRecord::failure(
                StepKind::ChargePayment,
                FailureClass::BusinessConflict,
                "declined",
            ),
        ];
        assert!(CompensationPlanner::new().plan(&steps).is_empty());
    }

    #[test]
    fn test_inventory_failure_plans_refund() {
        let steps = vec![
            success(StepKind::SelectProduct, "p1"),
            success(StepKind::ChargePayment, "PAY-0001"),
            StepRecord::failure(
                StepKind::DecrementInventory,
                FailureClass::BusinessConflict,
                "out of stock",
            ),
            StepRecord::skipped(StepKind::RegisterPurchase),
        ];
        let plan = CompensationPlanner::new().plan(&steps);
        assert_eq!(plan.kinds(), vec![StepKind::RefundPayment]);
        assert_eq!(
            plan.actions()[0].external_reference.as_deref(),
            Some("PAY-0001")
        );
    }

    #[test]
    fn test_plan_is_reverse_order_and_skips_inventory() {
        let steps = vec![
            success(StepKind::SelectProduct, "p1"),
            success(StepKind::ChargePayment, "PAY-0001"),
            success(StepKind::DecrementInventory, "INV-0001"),
            success(StepKind::RegisterPurchase, "PUR-0001"),
        ];
        let plan = CompensationPlanner::new().plan(&steps);
        assert_eq!(
            plan.kinds(),
            vec![StepKind::CancelPurchase, StepKind::RefundPayment]
        );
        assert_eq!(plan.actions()[0].forward, StepKind::RegisterPurchase);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let steps = vec![
            success(StepKind::SelectProduct, "p1"),
            success(StepKind::ChargePayment, "PAY-0001"),
            success(StepKind::RegisterPurchase, "PUR-0001"),
        ];
        let planner = CompensationPlanner::new();
        assert_eq!(planner.plan(&steps), planner.plan(&steps));
    }

    #[test]
    fn test_compensation_records_are_ignored() {
        let steps = vec![
            success(StepKind::ChargePayment, "PAY-0001"),
            success(StepKind::RefundPayment, "PAY-0001"),
        ];
        let plan = CompensationPlanner::new().plan(&steps);
        assert_eq!(plan.kinds(), vec![StepKind::RefundPayment]);
    }

    #[test]
    fn test_custom_policy() {
        struct NothingToUndo;
        impl CompensationPolicy for NothingToUndo {
            fn compensation_for(&self, _: StepKind) -> Option<StepKind> {
                None
            }
        }

        let steps = vec![success(StepKind::ChargePayment, "PAY-0001")];
        let plan = CompensationPlanner::with_policy(NothingToUndo).plan(&steps);
        assert!(plan.is_empty());
    }
}
