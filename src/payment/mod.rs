//! Masumi payment service integration.
//!
//! A job is only executed once the purchaser has locked funds in the escrow
//! contract. The flow against the payment service is:
//!
//! 1. `create_payment_request` - register what the purchaser owes and the
//!    deadlines; the service answers with a `blockchainIdentifier`
//! 2. `payment_state` - polled by the monitor until funds are locked
//! 3. `complete_payment` - submit the SHA-256 of the result to claim the funds

mod error;
mod masumi;

pub use error::{PaymentError, RetryPolicy};
pub use masumi::MasumiPaymentClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{Network, PaymentConfig};

/// Payment type understood by the payment service.
pub const PAYMENT_TYPE: &str = "Web3CardanoV1";

/// A payment request to register with the payment service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub agent_identifier: String,
    pub network: Network,
    pub input_hash: String,
    pub identifier_from_purchaser: String,
    pub pay_by_time: DateTime<Utc>,
    pub submit_result_time: DateTime<Utc>,
    pub unlock_time: DateTime<Utc>,
    pub external_dispute_unlock_time: DateTime<Utc>,
    pub metadata: Option<String>,
}

impl PaymentRequest {
    /// Build a request whose deadlines start at `now`.
    ///
    /// Fails if a window pushes a deadline beyond what a timestamp can hold.
    pub fn new(
        config: &PaymentConfig,
        input_hash: String,
        identifier_from_purchaser: String,
        now: DateTime<Utc>,
    ) -> Result<Self, PaymentError> {
        let after = |name: &str, window: std::time::Duration| {
            chrono::Duration::from_std(window)
                .ok()
                .and_then(|offset| now.checked_add_signed(offset))
                .ok_or_else(|| {
                    PaymentError::InvalidRequest(format!("{} window of {:?} is out of range", name, window))
                })
        };
        Ok(Self {
            agent_identifier: config.agent_identifier.clone(),
            network: config.network,
            input_hash,
            identifier_from_purchaser,
            pay_by_time: after("pay-by", config.windows.pay_by)?,
            submit_result_time: after("submit-result", config.windows.submit_result)?,
            unlock_time: after("unlock", config.windows.unlock)?,
            external_dispute_unlock_time: after("dispute-unlock", config.windows.dispute_unlock)?,
            metadata: None,
        })
    }
}

/// What the payment service answered to a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestResult {
    pub blockchain_identifier: String,
    pub input_hash: String,
    pub pay_by_time: String,
    pub submit_result_time: String,
    pub unlock_time: String,
    pub external_dispute_unlock_time: String,
}

/// On-chain state of a payment as reported by the payment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnChainState {
    FundsLocked,
    ResultSubmitted,
    RefundRequested,
    Disputed,
    Withdrawn,
    RefundWithdrawn,
    DisputedWithdrawn,
    FundsOrDatumInvalid,
    /// No recognised state (including not yet seen on chain)
    #[serde(other)]
    Unknown,
}

impl OnChainState {
    /// Funds are locked and the job may run.
    pub fn is_funds_locked(&self) -> bool {
        matches!(self, OnChainState::FundsLocked)
    }

    /// The payment can no longer lead to an executed job.
    pub fn is_abandoned(&self) -> bool {
        matches!(
            self,
            OnChainState::RefundRequested
                | OnChainState::Disputed
                | OnChainState::RefundWithdrawn
                | OnChainState::DisputedWithdrawn
                | OnChainState::FundsOrDatumInvalid
        )
    }
}

impl std::fmt::Display for OnChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Payment service operations the agent depends on.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Register a payment request for a new job.
    async fn create_payment_request(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentRequestResult, PaymentError>;

    /// Current on-chain state of a payment.
    async fn payment_state(&self, blockchain_identifier: &str)
        -> Result<OnChainState, PaymentError>;

    /// Submit the result hash, claiming the locked funds.
    async fn complete_payment(
        &self,
        blockchain_identifier: &str,
        result_hash: &str,
    ) -> Result<(), PaymentError>;
}

/// Shared payment service handle.
pub type PaymentServiceRef = Arc<dyn PaymentService>;
