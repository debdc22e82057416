//! Transaction commands.

use common::TransactionId;

use crate::error::ValidationError;

use super::{Money, ProductRef, UserRef};

/// Validated request to start a purchase saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTransaction {
    /// The transaction to create, or to join if it already exists.
    pub transaction_id: TransactionId,

    /// The purchasing user.
    pub user_ref: UserRef,

    /// The product being purchased.
    pub product_ref: ProductRef,

    /// The amount to charge.
    pub amount: Money,
}

impl StartTransaction {
    /// Validates raw request fields and assigns a fresh transaction ID.
    ///
    /// The amount must be a positive decimal with at most two fractional
    /// digits.
    pub fn new(user_ref: &str, product_ref: &str, amount: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            transaction_id: TransactionId::new(),
            user_ref: UserRef::new(user_ref)?,
            product_ref: ProductRef::new(product_ref)?,
            amount: Money::parse_decimal(amount)?,
        })
    }

    /// Uses a caller-supplied transaction ID.
    ///
    /// Starting twice with the same ID joins the first saga instead of
    /// running a second one.
    pub fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = transaction_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_fields() {
        let cmd = StartTransaction::new("u1", "p1", "99.99").unwrap();
        assert_eq!(cmd.user_ref.as_str(), "u1");
        assert_eq!(cmd.product_ref.as_str(), "p1");
        assert_eq!(cmd.amount, Money::from_cents(9999));
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert_eq!(
            StartTransaction::new("", "p1", "1.00"),
            Err(ValidationError::MissingUserRef)
        );
        assert_eq!(
            StartTransaction::new("u1", " ", "1.00"),
            Err(ValidationError::MissingProductRef)
        );
        assert!(matches!(
            StartTransaction::new("u1", "p1", "0"),
            Err(ValidationError::NonPositiveAmount(_))
        ));
    }

    #[test]
    fn test_fresh_ids_unless_supplied() {
        let a = StartTransaction::new("u1", "p1", "1.00").unwrap();
        let b = StartTransaction::new("u1", "p1", "1.00").unwrap();
        assert_ne!(a.transaction_id, b.transaction_id);

        let id = TransactionId::new();
        let c = b.with_transaction_id(id);
        assert_eq!(c.transaction_id, id);
    }
}
