//! Agents - the work a paid job actually performs.
//!
//! # Agent Types
//! - **WalletReportAgent**: Summarizes the holdings of Cardano addresses via Kupo
//!
//! The runner calls [`Agent::execute`] only after the purchaser's funds are
//! locked on chain; the returned string is what gets hashed and delivered.

mod wallet_report;

pub use wallet_report::WalletReportAgent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::kupo::KupoError;

/// Input accepted by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobInput {
    /// Cardano addresses to analyze
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl JobInput {
    /// Trim addresses and drop blank entries.
    pub fn normalized(&self) -> Self {
        Self {
            addresses: self
                .addresses
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Canonical serialization sent to the payment service and hashed.
    pub fn to_input_data(&self) -> String {
        serde_json::to_string(&self.addresses).unwrap_or_else(|_| "[]".to_string())
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid job input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Kupo(#[from] KupoError),

    #[error("Agent timed out after {0} seconds")]
    Timeout(u64),
}

/// Base trait for all agents.
///
/// # Invariants
/// - `execute()` never panics; all errors are returned as `Err`
/// - The same input yields the same output while chain state is unchanged
#[async_trait]
pub trait Agent: Send + Sync {
    /// Short name used in logs and the health endpoint.
    fn name(&self) -> &str;

    /// Execute a paid job.
    async fn execute(&self, input: &JobInput) -> Result<String, AgentError>;
}

/// Shared agent handle.
pub type AgentRef = Arc<dyn Agent>;
