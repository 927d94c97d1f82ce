//! Payment service errors and the retry policy applied to them.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Longest raw body quoted in an error when the service sent no envelope.
const MAX_QUOTED_BODY: usize = 200;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// No response: connection refused, reset, or timed out.
    #[error("payment service unreachable: {0}")]
    Unreachable(String),

    /// Non-success HTTP status.
    #[error("payment service answered HTTP {status}: {message}")]
    Rejected {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// A success status whose body was not the expected envelope.
    #[error("unexpected payment service response: {0}")]
    InvalidResponse(String),

    /// The request could not be built from the configured windows.
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),
}

impl PaymentError {
    /// Build an error from a non-success response, preferring the message of
    /// the service's `{"status": "error", ...}` envelope over the raw body.
    pub fn from_response(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        Self::Rejected {
            status,
            message: error_message(body),
            retry_after,
        }
    }

    /// HTTP status of a rejected call.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the same call may succeed if repeated.
    ///
    /// Rate limits, 5xx and network failures are transient. Other 4xx
    /// (bad token, unknown payment, closed window) will not change.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::InvalidRequest(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Rejected { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Error envelope of the payment service. Seen as
/// `{"status": "error", "error": {"message": ...}}`, with `error` as a plain
/// string, or with a top-level `message`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

fn error_message(body: &str) -> String {
    let from_envelope = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| {
            let nested = match envelope.error {
                Some(serde_json::Value::String(message)) => Some(message),
                Some(serde_json::Value::Object(fields)) => fields
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                _ => None,
            };
            nested.or(envelope.message)
        });

    from_envelope.unwrap_or_else(|| {
        let body = body.trim();
        if body.is_empty() {
            "(empty body)".to_string()
        } else {
            body.chars().take(MAX_QUOTED_BODY).collect()
        }
    })
}

/// How often and how patiently a call is repeated after a transient error.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Repeats after the first attempt
    pub max_retries: u32,
    /// Backoff before the first repeat; doubles each attempt
    pub base_delay: Duration,
    /// Upper bound for any single wait, including `Retry-After`
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Single attempt. Used where the caller polls again anyway.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, error: &PaymentError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }

    /// Wait before repeat number `attempt + 1`.
    ///
    /// `Retry-After` wins when present. Otherwise exponential backoff with
    /// jitter drawn from the upper half of the window, so concurrent callers
    /// spread out.
    pub fn delay(&self, error: &PaymentError, attempt: u32) -> Duration {
        if let Some(retry_after) = error.retry_after() {
            return retry_after.min(self.max_delay);
        }
        let max_ms = self.max_delay.as_millis() as u64;
        let window_ms = (self.base_delay.as_millis() as u64)
            .saturating_mul(1u64 << attempt.min(20))
            .min(max_ms);
        if window_ms < 2 {
            return Duration::from_millis(window_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(window_ms / 2..=window_ms))
    }
}
