//! Kupo chain-indexer client.
//!
//! Kupo indexes Cardano outputs by address pattern. `GET /matches/{address}?unspent`
//! returns every unspent output currently sitting at an address.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::util::is_cardano_address;

#[derive(Debug, Error)]
pub enum KupoError {
    #[error("Not a Cardano address: {0}")]
    InvalidAddress(String),

    #[error("Kupo request failed: {0}")]
    Request(String),

    #[error("Kupo returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse Kupo response: {0}")]
    Parse(String),
}

/// A single output match returned by Kupo.
#[derive(Debug, Clone, Deserialize)]
pub struct KupoMatch {
    pub value: KupoValue,
}

/// Value held by an output.
#[derive(Debug, Clone, Deserialize)]
pub struct KupoValue {
    /// Lovelace
    pub coins: u64,
    /// Native assets keyed by `policy_id.asset_name`
    #[serde(default)]
    pub assets: HashMap<String, u64>,
}

/// Aggregated holdings of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressBalance {
    pub address: String,
    pub lovelace: u64,
    pub outputs: usize,
    /// Number of distinct native assets held
    pub assets: usize,
}

impl AddressBalance {
    /// Fold a list of matches into a balance.
    pub fn from_matches(address: &str, matches: &[KupoMatch]) -> Self {
        let lovelace = matches.iter().map(|m| m.value.coins).sum();
        let mut asset_ids: Vec<&String> = matches.iter().flat_map(|m| m.value.assets.keys()).collect();
        asset_ids.sort();
        asset_ids.dedup();
        Self {
            address: address.to_string(),
            lovelace,
            outputs: matches.len(),
            assets: asset_ids.len(),
        }
    }
}

/// Client for the Kupo HTTP API.
#[derive(Debug, Clone)]
pub struct KupoClient {
    client: Client,
    base_url: Url,
}

impl KupoClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, KupoError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KupoError::Request(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    /// `{base}/matches/{address}?unspent`, with the address as one encoded segment.
    fn matches_url(&self, address: &str) -> Result<Url, KupoError> {
        if !is_cardano_address(address) {
            return Err(KupoError::InvalidAddress(address.to_string()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| KupoError::Request(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .push("matches")
            .push(address);
        url.set_query(Some("unspent"));
        Ok(url)
    }

    /// Unspent outputs at `address`.
    pub async fn matches(&self, address: &str) -> Result<Vec<KupoMatch>, KupoError> {
        let url = self.matches_url(address)?;
        tracing::debug!("Querying Kupo: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                KupoError::Request(format!("request timed out: {}", e))
            } else {
                KupoError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| KupoError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(KupoError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| KupoError::Parse(e.to_string()))
    }

    /// Aggregated balance of `address`.
    pub async fn balance(&self, address: &str) -> Result<AddressBalance, KupoError> {
        let matches = self.matches(address).await?;
        Ok(AddressBalance::from_matches(address, &matches))
    }
}
