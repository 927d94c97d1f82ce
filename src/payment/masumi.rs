//! Masumi payment service HTTP client with automatic retry for transient errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::error::{PaymentError, RetryPolicy};
use super::{OnChainState, PaymentRequest, PaymentRequestResult, PaymentService, PAYMENT_TYPE};
use crate::config::{Network, PaymentConfig};

/// Masumi payment service client.
pub struct MasumiPaymentClient {
    client: Client,
    base_url: String,
    api_key: String,
    network: Network,
    retry_policy: RetryPolicy,
}

impl MasumiPaymentClient {
    /// Create a client with the default retry policy.
    pub fn new(config: &PaymentConfig) -> Result<Self, PaymentError> {
        Self::with_retry_policy(config, RetryPolicy::default())
    }

    /// Create a client with a custom retry policy.
    pub fn with_retry_policy(
        config: &PaymentConfig,
        retry_policy: RetryPolicy,
    ) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PaymentError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.service_url.as_str().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            network: config.network,
            retry_policy,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok().map(Duration::from_secs))
    }

    /// Execute a single POST without retry, returning the success body.
    async fn post_once<B>(&self, path: &str, body: &B) -> Result<String, PaymentError>
    where
        B: Serialize + Sync,
    {
        let response = self
            .client
            .post(self.endpoint(path))
            .header("token", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PaymentError::Unreachable(format!("request timed out: {}", e))
                } else if e.is_connect() {
                    PaymentError::Unreachable(format!("connection failed: {}", e))
                } else {
                    PaymentError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| PaymentError::Unreachable(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(PaymentError::from_response(status.as_u16(), &text, retry_after));
        }
        Ok(text)
    }

    /// Execute a POST, repeating it after transient errors.
    async fn post<B>(&self, path: &str, body: &B) -> Result<String, PaymentError>
    where
        B: Serialize + Sync,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.post_once(path, body).await {
                Ok(text) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Payment service call to {} succeeded after {} retries ({:?})",
                            path,
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(text);
                }
                Err(error) if self.retry_policy.should_retry(&error, attempt) => {
                    let delay = self.retry_policy.delay(&error, attempt);
                    tracing::warn!(
                        "Payment service call to {} failed (attempt {}), retrying in {:?}: {}",
                        path,
                        attempt + 1,
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if attempt > 0 {
                        tracing::error!(
                            "Payment service call to {} failed after {} retries: {}",
                            path,
                            attempt,
                            error
                        );
                    }
                    return Err(error);
                }
            }
        }
    }
}

/// Decode the `data` member of a success envelope.
fn parse_data<T: DeserializeOwned>(path: &str, text: &str) -> Result<T, PaymentError> {
    serde_json::from_str::<Envelope<T>>(text)
        .map(|envelope| envelope.data)
        .map_err(|e| PaymentError::InvalidResponse(format!("{}: {} (body: {})", path, e, text)))
}

/// Response envelope: `{"status": "success", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentBody<'a> {
    agent_identifier: &'a str,
    network: &'a str,
    input_hash: &'a str,
    pay_by_time: String,
    submit_result_time: String,
    unlock_time: String,
    external_dispute_unlock_time: String,
    payment_type: &'a str,
    identifier_from_purchaser: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a str>,
}

/// Payment data as returned by the service; times may be strings or numbers.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedPayment {
    blockchain_identifier: String,
    #[serde(default)]
    input_hash: Option<String>,
    #[serde(default)]
    pay_by_time: serde_json::Value,
    #[serde(default)]
    submit_result_time: serde_json::Value,
    #[serde(default)]
    unlock_time: serde_json::Value,
    #[serde(default)]
    external_dispute_unlock_time: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolvePaymentBody<'a> {
    blockchain_identifier: &'a str,
    network: &'a str,
    include_history: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedPayment {
    #[serde(default)]
    on_chain_state: Option<OnChainState>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResultBody<'a> {
    network: &'a str,
    blockchain_identifier: &'a str,
    submit_result_hash: &'a str,
}

fn timestamp_field(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PaymentService for MasumiPaymentClient {
    async fn create_payment_request(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentRequestResult, PaymentError> {
        let body = CreatePaymentBody {
            agent_identifier: &request.agent_identifier,
            network: request.network.as_str(),
            input_hash: &request.input_hash,
            pay_by_time: request.pay_by_time.timestamp_millis().to_string(),
            submit_result_time: request.submit_result_time.timestamp_millis().to_string(),
            unlock_time: request.unlock_time.timestamp_millis().to_string(),
            external_dispute_unlock_time: request
                .external_dispute_unlock_time
                .timestamp_millis()
                .to_string(),
            payment_type: PAYMENT_TYPE,
            identifier_from_purchaser: &request.identifier_from_purchaser,
            metadata: request.metadata.as_deref(),
        };

        let text = self.post("payment/", &body).await?;
        let created: CreatedPayment = parse_data("payment/", &text)?;
        tracing::info!(
            "Created payment request {} for purchaser {}",
            created.blockchain_identifier,
            request.identifier_from_purchaser
        );

        Ok(PaymentRequestResult {
            blockchain_identifier: created.blockchain_identifier,
            input_hash: created
                .input_hash
                .unwrap_or_else(|| request.input_hash.clone()),
            pay_by_time: timestamp_field(&created.pay_by_time),
            submit_result_time: timestamp_field(&created.submit_result_time),
            unlock_time: timestamp_field(&created.unlock_time),
            external_dispute_unlock_time: timestamp_field(&created.external_dispute_unlock_time),
        })
    }

    async fn payment_state(
        &self,
        blockchain_identifier: &str,
    ) -> Result<OnChainState, PaymentError> {
        let body = ResolvePaymentBody {
            blockchain_identifier,
            network: self.network.as_str(),
            include_history: "false",
        };
        let path = "payment/resolve-blockchain-identifier";
        let text = self.post(path, &body).await?;
        let resolved: ResolvedPayment = parse_data(path, &text)?;
        Ok(resolved.on_chain_state.unwrap_or(OnChainState::Unknown))
    }

    async fn complete_payment(
        &self,
        blockchain_identifier: &str,
        result_hash: &str,
    ) -> Result<(), PaymentError> {
        let body = SubmitResultBody {
            network: self.network.as_str(),
            blockchain_identifier,
            submit_result_hash: result_hash,
        };
        // Any 2xx means the hash was accepted; the body is not needed.
        self.post("payment/submit-result", &body).await?;
        tracing::info!("Submitted result hash for payment {}", blockchain_identifier);
        Ok(())
    }
}
