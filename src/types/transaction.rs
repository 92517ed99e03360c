//! Transaction data structures for crypto risk assessment

use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A cryptocurrency transaction submitted for risk assessment.
///
/// Immutable once submitted; the pipeline never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    pub id: String,

    /// Sending address
    pub from_address: String,

    /// Receiving address
    pub to_address: String,

    /// Amount in the transaction's native currency
    pub amount: Decimal,

    /// Currency ticker (e.g. "BTC", "ETH")
    pub currency: String,

    /// Submission timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Create a new transaction with the given endpoints and amount.
    pub fn new(
        id: impl Into<String>,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from_address: from_address.into(),
            to_address: to_address.into(),
            amount,
            currency: currency.into(),
            timestamp: Utc::now(),
        }
    }

    /// Validate the transaction before dispatch.
    ///
    /// A malformed transaction is rejected outright; no component ever sees
    /// a partially valid one.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::InputValidation("empty transaction id".into()));
        }
        if self.from_address.trim().is_empty() {
            return Err(PipelineError::InputValidation("empty from_address".into()));
        }
        if self.to_address.trim().is_empty() {
            return Err(PipelineError::InputValidation("empty to_address".into()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(PipelineError::InputValidation(format!(
                "non-positive amount {}",
                self.amount
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(PipelineError::InputValidation("empty currency".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn sample() -> Transaction {
        Transaction::new(
            "tx_123",
            "bc1q_sender",
            "bc1q_receiver",
            Decimal::from_f64(0.5).unwrap(),
            "BTC",
        )
    }

    #[test]
    fn test_transaction_serialization() {
        let tx = sample();

        let json = serde_json::to_string(&tx).unwrap();
        let deserialized: Transaction = serde_json::from_str(&json).unwrap();

        assert_eq!(tx.id, deserialized.id);
        assert_eq!(tx.from_address, deserialized.from_address);
        assert_eq!(tx.amount, deserialized.amount);
    }

    #[test]
    fn test_validation_accepts_well_formed() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        let mut tx = sample();
        tx.id = "  ".into();
        assert!(matches!(
            tx.validate(),
            Err(PipelineError::InputValidation(_))
        ));

        let mut tx = sample();
        tx.amount = Decimal::ZERO;
        assert!(tx.validate().is_err());

        let mut tx = sample();
        tx.currency = String::new();
        assert!(tx.validate().is_err());
    }
}
