//! Wallet report agent.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Serialize;

use super::{Agent, AgentError, JobInput};
use crate::kupo::{AddressBalance, KupoClient};
use crate::pricing::LOVELACE_PER_ADA;

/// Per-address line of the report.
#[derive(Debug, Clone, Serialize)]
struct AddressReport {
    address: String,
    lovelace: u64,
    ada: String,
    outputs: usize,
    assets: usize,
}

impl From<AddressBalance> for AddressReport {
    fn from(balance: AddressBalance) -> Self {
        Self {
            ada: format_ada(balance.lovelace),
            address: balance.address,
            lovelace: balance.lovelace,
            outputs: balance.outputs,
            assets: balance.assets,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct WalletReport {
    addresses: Vec<AddressReport>,
    total_lovelace: u64,
    total_ada: String,
}

/// Format lovelace as an ADA decimal string with six fractional digits.
fn format_ada(lovelace: u64) -> String {
    format!(
        "{}.{:06}",
        lovelace / LOVELACE_PER_ADA,
        lovelace % LOVELACE_PER_ADA
    )
}

/// Reports the ADA held by each address in a job, plus totals.
pub struct WalletReportAgent {
    kupo: KupoClient,
}

impl WalletReportAgent {
    pub fn new(kupo: KupoClient) -> Self {
        Self { kupo }
    }
}

#[async_trait]
impl Agent for WalletReportAgent {
    fn name(&self) -> &str {
        "wallet-report"
    }

    async fn execute(&self, input: &JobInput) -> Result<String, AgentError> {
        let input = input.normalized();
        if input.addresses.is_empty() {
            return Err(AgentError::InvalidInput(
                "at least one address is required".to_string(),
            ));
        }

        // One owned lookup per address; results come back in input order.
        let lookups: Vec<_> = input
            .addresses
            .into_iter()
            .map(|address| {
                let kupo = self.kupo.clone();
                async move { kupo.balance(&address).await }
            })
            .collect();
        let balances: Vec<AddressBalance> = try_join_all(lookups).await?;

        let total_lovelace = balances.iter().map(|b| b.lovelace).sum();
        let report = WalletReport {
            addresses: balances.into_iter().map(AddressReport::from).collect(),
            total_lovelace,
            total_ada: format_ada(total_lovelace),
        };

        tracing::debug!(
            "Wallet report covers {} addresses, {} lovelace total",
            report.addresses.len(),
            total_lovelace
        );

        serde_json::to_string(&report)
            .map_err(|e| AgentError::InvalidInput(format!("Failed to serialize report: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_address;
    use httpmock::prelude::*;
    use std::time::Duration;
    use url::Url;

    fn agent_for(base_url: &str) -> WalletReportAgent {
        WalletReportAgent::new(
            KupoClient::new(Url::parse(base_url).unwrap(), Duration::from_secs(5)).unwrap(),
        )
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn format_ada_pads_fraction() {
        assert_eq!(format_ada(0), "0.000000");
        assert_eq!(format_ada(1_500_000), "1.500000");
        assert_eq!(format_ada(42), "0.000042");
        assert_eq!(format_ada(10_000_000), "10.000000");
    }

    #[tokio::test]
    async fn report_lists_addresses_in_order_with_totals() {
        let server = MockServer::start_async().await;
        let (addr_a, addr_b) = (test_address(0), test_address(1));
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/matches/{}", addr_a));
                then.status(200)
                    .json_body(serde_json::json!([{"value": {"coins": 2_000_000}}]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/matches/{}", addr_b));
                then.status(200).json_body(serde_json::json!([
                    {"value": {"coins": 250_000, "assets": {"p.t": 3}}},
                    {"value": {"coins": 750_000}}
                ]));
            })
            .await;

        let agent = agent_for(&server.base_url());
        let input = JobInput {
            addresses: vec![addr_a.clone(), format!(" {} ", addr_b)],
        };

        let execution = agent.execute(&input);
        assert_send(&execution);
        let raw = execution.await.unwrap();
        let report: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(report["total_lovelace"], 3_000_000);
        assert_eq!(report["total_ada"], "3.000000");
        assert_eq!(report["addresses"][0]["address"], addr_a.as_str());
        assert_eq!(report["addresses"][1]["address"], addr_b.as_str());
        assert_eq!(report["addresses"][1]["outputs"], 2);
        assert_eq!(report["addresses"][1]["assets"], 1);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let agent = agent_for("http://127.0.0.1:1");
        let result = agent.execute(&JobInput::default()).await;
        assert!(matches!(result, Err(AgentError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn kupo_failure_fails_the_job() {
        let server = MockServer::start_async().await;
        let address = test_address(2);
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/matches/{}", address));
                then.status(503).body("unavailable");
            })
            .await;

        let agent = agent_for(&server.base_url());
        let input = JobInput {
            addresses: vec![address],
        };
        assert!(matches!(agent.execute(&input).await, Err(AgentError::Kupo(_))));
    }
}
