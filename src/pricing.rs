//! Job pricing.
//!
//! Amounts follow the payment service's wire format: a decimal string plus a
//! unit. `lovelace` is the Cardano base unit (1 ADA = 1_000_000 lovelace).

use serde::{Deserialize, Serialize};

use crate::agent::JobInput;

/// Unit string for ADA amounts.
pub const LOVELACE: &str = "lovelace";

/// Lovelace per ADA.
pub const LOVELACE_PER_ADA: u64 = 1_000_000;

/// A single amount owed for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub amount: String,
    pub unit: String,
}

impl Amount {
    pub fn lovelace(amount: u64) -> Self {
        Self {
            amount: amount.to_string(),
            unit: LOVELACE.to_string(),
        }
    }
}

/// Prices jobs before a payment request is created.
#[derive(Debug, Clone)]
pub struct Pricing {
    price_lovelace: u64,
}

impl Pricing {
    pub fn fixed(price_lovelace: u64) -> Self {
        Self { price_lovelace }
    }

    /// Amounts the purchaser must lock for `input`.
    ///
    /// Every job currently costs the same flat price regardless of input size.
    pub fn price(&self, _input: &JobInput) -> Vec<Amount> {
        vec![Amount::lovelace(self.price_lovelace)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_price_is_charged_in_lovelace() {
        let pricing = Pricing::fixed(10 * LOVELACE_PER_ADA);
        let input = JobInput {
            addresses: vec!["addr1".to_string(), "addr2".to_string()],
        };
        assert_eq!(
            pricing.price(&input),
            vec![Amount {
                amount: "10000000".to_string(),
                unit: "lovelace".to_string(),
            }]
        );
    }

    #[test]
    fn amount_serializes_as_strings() {
        let json = serde_json::to_value(Amount::lovelace(5)).unwrap();
        assert_eq!(json, serde_json::json!({"amount": "5", "unit": "lovelace"}));
    }
}
