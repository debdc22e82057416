//! Transaction status state machine.

use serde::{Deserialize, Serialize};

/// The status of a saga transaction in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► InProgress ──┬──► Completed
///                          └──► Compensating ──┬──► Compensated
///                                              └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Transaction has been recorded but no step has run.
    #[default]
    Pending,

    /// Forward steps are being executed.
    InProgress,

    /// Every forward step succeeded (terminal state).
    Completed,

    /// A forward step failed and compensations are running.
    Compensating,

    /// Every required compensation succeeded (terminal state).
    Compensated,

    /// A compensation failed; the inconsistency is recorded (terminal state).
    Failed,
}

impl TransactionStatus {
    /// Returns true if the forward phase can begin.
    pub fn can_begin(&self) -> bool {
        matches!(self, TransactionStatus::Pending)
    }

    /// Returns true if forward step records may be appended.
    pub fn accepts_forward_steps(&self) -> bool {
        matches!(self, TransactionStatus::InProgress)
    }

    /// Returns true if compensation step records may be appended.
    pub fn accepts_compensation_steps(&self) -> bool {
        matches!(self, TransactionStatus::Compensating)
    }

    /// Returns true if the transaction can be completed.
    pub fn can_complete(&self) -> bool {
        matches!(self, TransactionStatus::InProgress)
    }

    /// Returns true if compensation can start.
    pub fn can_compensate(&self) -> bool {
        matches!(self, TransactionStatus::InProgress)
    }

    /// Returns true if the compensation phase can end, successfully or not.
    pub fn can_finish_compensation(&self) -> bool {
        matches!(self, TransactionStatus::Compensating)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Compensated
                | TransactionStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::InProgress => "IN_PROGRESS",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Compensating => "COMPENSATING",
            TransactionStatus::Compensated => "COMPENSATED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "IN_PROGRESS" => Ok(TransactionStatus::InProgress),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "COMPENSATING" => Ok(TransactionStatus::Compensating),
            "COMPENSATED" => Ok(TransactionStatus::Compensated),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TransactionStatus; 6] = [
        TransactionStatus::Pending,
        TransactionStatus::InProgress,
        TransactionStatus::Completed,
        TransactionStatus::Compensating,
        TransactionStatus::Compensated,
        TransactionStatus::Failed,
    ];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(TransactionStatus::default(), TransactionStatus::Pending);
    }

    #[test]
    fn test_can_begin() {
        assert!(TransactionStatus::Pending.can_begin());
        for status in &ALL[1..] {
            assert!(!status.can_begin());
        }
    }

    #[test]
    fn test_step_acceptance() {
        assert!(TransactionStatus::InProgress.accepts_forward_steps());
        assert!(!TransactionStatus::Compensating.accepts_forward_steps());
        assert!(TransactionStatus::Compensating.accepts_compensation_steps());
        assert!(!TransactionStatus::InProgress.accepts_compensation_steps());
        assert!(!TransactionStatus::Compensated.accepts_compensation_steps());
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                &TransactionStatus::Completed,
                &TransactionStatus::Compensated,
                &TransactionStatus::Failed
            ]
        );
    }

    #[test]
    fn test_display_and_parse() {
        for status in ALL {
            let parsed: TransactionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("RUNNING".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_serialization_uses_screaming_case() {
        let json = serde_json::to_string(&TransactionStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }
}
