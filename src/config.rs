//! Configuration management for the agent service.
//!
//! Configuration is read from environment variables (a `.env` file is loaded
//! by the binary before this runs):
//! - `MASUMI_PAYMENT_SERVICE_URL` - Required. Base URL of the Masumi payment service.
//! - `MASUMI_PAYMENT_API_KEY` - Required. API key for the payment service.
//! - `MASUMI_AGENT_ID` - Required. Agent identifier registered with the payment service.
//! - `SELLING_WALLET_VKEY` - Required. Verification key of the selling wallet.
//! - `MASUMI_NETWORK` - Optional. `Preprod` or `Mainnet`. Defaults to `Preprod`.
//! - `KUPO_URL` - Required. Base URL of the Kupo chain indexer.
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `JOB_STORE` - Optional. `sqlite` (or `db`) or `memory`. Defaults to `sqlite`.
//! - `DATA_DIR` - Optional. Directory for the job database. Defaults to `./data`.
//! - `JOB_PRICE_LOVELACE` - Optional. Fixed job price. Defaults to `10000000` (10 ADA).
//! - `MAX_ADDRESSES_PER_JOB` - Optional. Defaults to `20`.
//! - `PAYMENT_POLL_INTERVAL_SECS` - Optional. Defaults to `20`.
//! - `PAY_BY_MINUTES`, `SUBMIT_RESULT_MINUTES`, `UNLOCK_MINUTES`,
//!   `DISPUTE_UNLOCK_MINUTES` - Optional. Payment time windows.
//! - `MAX_CONCURRENT_JOBS` - Optional. Defaults to `4`.
//! - `AGENT_TIMEOUT_SECS` - Optional. Defaults to `600`.
//! - `PAYMENT_REQUEST_TIMEOUT_SECS` - Optional. Per-request timeout for the payment service. Defaults to `30`.
//! - `KUPO_TIMEOUT_SECS` - Optional. Per-request timeout for Kupo. Defaults to `30`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::jobs::JobStoreType;

/// Longest accepted payment window (ten years).
const MAX_WINDOW_MINUTES: u64 = 10 * 365 * 24 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Cardano network the payment service settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Preprod,
    Mainnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Preprod => "Preprod",
            Network::Mainnet => "Mainnet",
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preprod" => Ok(Network::Preprod),
            "mainnet" => Ok(Network::Mainnet),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Time windows attached to every payment request, relative to its creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentWindows {
    /// Purchaser must lock funds before this
    pub pay_by: Duration,
    /// Seller must submit the result hash before this
    pub submit_result: Duration,
    /// Funds unlock for the seller after this
    pub unlock: Duration,
    /// External dispute window closes after this
    pub dispute_unlock: Duration,
}

impl Default for PaymentWindows {
    fn default() -> Self {
        Self {
            pay_by: Duration::from_secs(60 * 60),
            submit_result: Duration::from_secs(12 * 60 * 60),
            unlock: Duration::from_secs(24 * 60 * 60),
            dispute_unlock: Duration::from_secs(48 * 60 * 60),
        }
    }
}

impl PaymentWindows {
    /// Each window must end strictly after the previous one.
    pub fn is_ordered(&self) -> bool {
        self.pay_by < self.submit_result
            && self.submit_result < self.unlock
            && self.unlock < self.dispute_unlock
    }
}

/// Payment service configuration.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub service_url: Url,
    pub api_key: String,
    pub agent_identifier: String,
    pub seller_vkey: String,
    pub network: Network,
    pub windows: PaymentWindows,
    pub poll_interval: Duration,
    /// Upper bound for a single HTTP request
    pub request_timeout: Duration,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    pub payment: PaymentConfig,

    /// Kupo indexer base URL
    pub kupo_url: Url,

    pub kupo_timeout: Duration,

    /// Job store backend
    pub job_store: JobStoreType,

    /// Directory holding the SQLite job database
    pub data_dir: PathBuf,

    /// Fixed price per job, in lovelace
    pub job_price_lovelace: u64,

    pub max_addresses_per_job: usize,

    /// Maximum number of agent executions running at once
    pub max_concurrent_jobs: usize,

    pub agent_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if a required variable is not set,
    /// and `ConfigError::InvalidValue` if a value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };

        let service_url = parse_url("MASUMI_PAYMENT_SERVICE_URL", &required("MASUMI_PAYMENT_SERVICE_URL")?)?;
        let api_key = required("MASUMI_PAYMENT_API_KEY")?;
        let agent_identifier = required("MASUMI_AGENT_ID")?;
        let seller_vkey = required("SELLING_WALLET_VKEY")?;
        let kupo_url = parse_url("KUPO_URL", &required("KUPO_URL")?)?;

        let network = match lookup("MASUMI_NETWORK") {
            Some(value) => value
                .parse()
                .map_err(|e| ConfigError::InvalidValue("MASUMI_NETWORK".to_string(), e))?,
            None => Network::default(),
        };

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&lookup, "PORT", 8000)?;

        let job_store = match lookup("JOB_STORE") {
            Some(value) => value
                .parse()
                .map_err(|e| ConfigError::InvalidValue("JOB_STORE".to_string(), e))?,
            None => JobStoreType::default(),
        };
        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let job_price_lovelace: u64 = parse_positive(&lookup, "JOB_PRICE_LOVELACE", 10_000_000)?;
        let max_addresses_per_job: usize = parse_positive(&lookup, "MAX_ADDRESSES_PER_JOB", 20)?;
        let poll_secs: u64 = parse_positive(&lookup, "PAYMENT_POLL_INTERVAL_SECS", 20)?;
        let max_concurrent_jobs: usize = parse_positive(&lookup, "MAX_CONCURRENT_JOBS", 4)?;
        let agent_timeout_secs: u64 = parse_positive(&lookup, "AGENT_TIMEOUT_SECS", 600)?;
        let request_timeout_secs: u64 = parse_positive(&lookup, "PAYMENT_REQUEST_TIMEOUT_SECS", 30)?;
        let kupo_timeout_secs: u64 = parse_positive(&lookup, "KUPO_TIMEOUT_SECS", 30)?;

        let defaults = PaymentWindows::default();
        let minutes = |name: &str, default: Duration| -> Result<Duration, ConfigError> {
            let value: u64 = parse_positive(&lookup, name, default.as_secs() / 60)?;
            value
                .checked_mul(60)
                .filter(|_| value <= MAX_WINDOW_MINUTES)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        name.to_string(),
                        format!("must be at most {} minutes", MAX_WINDOW_MINUTES),
                    )
                })
        };
        let windows = PaymentWindows {
            pay_by: minutes("PAY_BY_MINUTES", defaults.pay_by)?,
            submit_result: minutes("SUBMIT_RESULT_MINUTES", defaults.submit_result)?,
            unlock: minutes("UNLOCK_MINUTES", defaults.unlock)?,
            dispute_unlock: minutes("DISPUTE_UNLOCK_MINUTES", defaults.dispute_unlock)?,
        };
        if !windows.is_ordered() {
            return Err(ConfigError::InvalidValue(
                "payment windows".to_string(),
                "PAY_BY < SUBMIT_RESULT < UNLOCK < DISPUTE_UNLOCK must hold".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            payment: PaymentConfig {
                service_url,
                api_key,
                agent_identifier,
                seller_vkey,
                network,
                windows,
                poll_interval: Duration::from_secs(poll_secs),
                request_timeout: Duration::from_secs(request_timeout_secs),
            },
            kupo_url,
            kupo_timeout: Duration::from_secs(kupo_timeout_secs),
            job_store,
            data_dir,
            job_price_lovelace,
            max_addresses_per_job,
            max_concurrent_jobs,
            agent_timeout: Duration::from_secs(agent_timeout_secs),
        })
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn parse_positive<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parse_or(lookup, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}
