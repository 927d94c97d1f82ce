//! In-process fakes for the payment service and the agent.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::agent::{Agent, AgentError, JobInput};
use crate::config::Config;
use crate::payment::{
    OnChainState, PaymentError, PaymentRequest, PaymentRequestResult, PaymentService,
};

/// Payment service double. Every payment reports the same on-chain state
/// unless one was set for its blockchain identifier.
pub struct FakePayments {
    state: Mutex<OnChainState>,
    states: Mutex<HashMap<String, OnChainState>>,
    fail_requests: AtomicBool,
    fail_state: AtomicBool,
    fail_completion: AtomicBool,
    requests: Mutex<Vec<PaymentRequest>>,
    completed: Mutex<Vec<(String, String)>>,
}

impl FakePayments {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OnChainState::Unknown),
            states: Mutex::new(HashMap::new()),
            fail_requests: AtomicBool::new(false),
            fail_state: AtomicBool::new(false),
            fail_completion: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn set_state(&self, state: OnChainState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_state_for(&self, blockchain_identifier: &str, state: OnChainState) {
        self.states
            .lock()
            .unwrap()
            .insert(blockchain_identifier.to_string(), state);
    }

    pub fn fail_requests(&self) {
        self.fail_requests.store(true, Ordering::SeqCst);
    }

    pub fn fail_state_checks(&self) {
        self.fail_state.store(true, Ordering::SeqCst);
    }

    pub fn fail_completion(&self) {
        self.fail_completion.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<(String, String)> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentService for FakePayments {
    async fn create_payment_request(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentRequestResult, PaymentError> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(PaymentError::from_response(503, "payment service down", None));
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(PaymentRequestResult {
            blockchain_identifier: format!("bc-{}", requests.len()),
            input_hash: request.input_hash.clone(),
            pay_by_time: request.pay_by_time.timestamp_millis().to_string(),
            submit_result_time: request.submit_result_time.timestamp_millis().to_string(),
            unlock_time: request.unlock_time.timestamp_millis().to_string(),
            external_dispute_unlock_time: request
                .external_dispute_unlock_time
                .timestamp_millis()
                .to_string(),
        })
    }

    async fn payment_state(
        &self,
        blockchain_identifier: &str,
    ) -> Result<OnChainState, PaymentError> {
        if self.fail_state.load(Ordering::SeqCst) {
            return Err(PaymentError::Unreachable("connection reset".to_string()));
        }
        if let Some(state) = self.states.lock().unwrap().get(blockchain_identifier) {
            return Ok(*state);
        }
        Ok(*self.state.lock().unwrap())
    }

    async fn complete_payment(
        &self,
        blockchain_identifier: &str,
        result_hash: &str,
    ) -> Result<(), PaymentError> {
        if self.fail_completion.load(Ordering::SeqCst) {
            return Err(PaymentError::from_response(400, "submit window closed", None));
        }
        self.completed
            .lock()
            .unwrap()
            .push((blockchain_identifier.to_string(), result_hash.to_string()));
        Ok(())
    }
}

/// Agent double with a canned outcome.
pub struct FakeAgent {
    outcome: Result<String, String>,
    delay: Option<Duration>,
}

impl FakeAgent {
    pub fn succeeding(result: &str) -> Self {
        Self {
            outcome: Ok(result.to_string()),
            delay: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Agent for FakeAgent {
    fn name(&self) -> &str {
        "fake"
    }

    async fn execute(&self, _input: &JobInput) -> Result<String, AgentError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone().map_err(AgentError::InvalidInput)
    }
}

/// A well-formed testnet address, distinct for every `seed` below 32.
pub fn test_address(seed: usize) -> String {
    const BECH32: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
    let data: String = (0..53)
        .map(|i| BECH32[(seed * 7 + i * 3) % BECH32.len()] as char)
        .collect();
    format!("addr_test1{}", data)
}

/// Configuration pointing at unused local endpoints, with the memory store.
pub fn test_config() -> Config {
    Config::from_lookup(|name| {
        let value = match name {
            "MASUMI_PAYMENT_SERVICE_URL" => "http://127.0.0.1:3001/api/v1",
            "MASUMI_PAYMENT_API_KEY" => "test-key",
            "MASUMI_AGENT_ID" => "agent-test",
            "SELLING_WALLET_VKEY" => "vkey-test",
            "KUPO_URL" => "http://127.0.0.1:1442",
            "JOB_STORE" => "memory",
            "MAX_ADDRESSES_PER_JOB" => "3",
            _ => return None,
        };
        Some(value.to_string())
    })
    .expect("test config is valid")
}
