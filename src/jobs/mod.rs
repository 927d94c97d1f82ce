//! Job storage module with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database (default)

mod memory;
mod sqlite;

pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::agent::JobInput;
use crate::pricing::Amount;

/// Job status, using the MIP-003 vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for the purchaser to lock funds
    AwaitingPayment,
    /// Agent is executing
    Running,
    /// Result is available
    Completed,
    /// Job will not produce a result
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::AwaitingPayment => "awaiting_payment",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awaiting_payment" => Some(JobStatus::AwaitingPayment),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement status of the job's payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Funds not locked yet
    Pending,
    /// Funds locked in escrow
    Locked,
    /// Result hash submitted, funds claimed
    Completed,
    /// Result hash could not be submitted
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Locked => "locked",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "locked" => Some(PaymentStatus::Locked),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A paid job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub payment_status: PaymentStatus,
    pub input: JobInput,
    /// Hash of the serialized input, as registered with the payment service
    pub input_hash: String,
    pub identifier_from_purchaser: String,
    /// Payment identifier on the payment service
    pub blockchain_identifier: String,
    pub amounts: Vec<Amount>,
    /// Deadline for the purchaser to lock funds
    pub pay_by_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<String>,
    /// Why the job failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields needed to register a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub input: JobInput,
    pub input_hash: String,
    pub identifier_from_purchaser: String,
    pub blockchain_identifier: String,
    pub amounts: Vec<Amount>,
    pub pay_by_time: DateTime<Utc>,
}

/// Job store trait - implemented by all storage backends.
///
/// # Invariants
/// - New jobs start as `awaiting_payment` / `pending`
/// - `complete_job` and `fail_job` refuse jobs that are already terminal
/// - Every write refreshes `updated_at`
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Create a new job awaiting payment.
    async fn create_job(&self, job: NewJob) -> Result<Job, String>;

    /// Get a single job by ID.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, String>;

    /// All jobs currently in `status`, oldest first.
    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, String>;

    /// Move a job from `awaiting_payment` to `running` with its payment locked.
    ///
    /// Returns `false` (and changes nothing) if the job is in any other status.
    async fn mark_running(&self, id: Uuid) -> Result<bool, String>;

    /// Store the result of a job and mark it completed.
    async fn complete_job(
        &self,
        id: Uuid,
        result: &str,
        result_hash: &str,
        payment_status: PaymentStatus,
    ) -> Result<(), String>;

    /// Mark a job failed with a reason.
    async fn fail_job(&self, id: Uuid, reason: &str) -> Result<(), String>;
}

/// Shared job store handle.
pub type JobStoreRef = Arc<dyn JobStore>;

/// Job store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStoreType {
    Memory,
    #[default]
    Sqlite,
}

impl std::str::FromStr for JobStoreType {
    type Err = String;

    /// Parse from environment variable value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(format!("unknown job store '{}' (expected sqlite or memory)", other)),
        }
    }
}

/// Create a job store based on type and configuration.
pub async fn create_job_store(
    store_type: JobStoreType,
    base_dir: PathBuf,
    agent_id: &str,
) -> Result<JobStoreRef, String> {
    match store_type {
        JobStoreType::Memory => Ok(Arc::new(InMemoryJobStore::new())),
        JobStoreType::Sqlite => {
            let store = SqliteJobStore::new(base_dir, agent_id).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn new_job(addresses: &[&str]) -> NewJob {
        let input = JobInput {
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
        };
        NewJob {
            input_hash: crate::util::sha256_hex(&input.to_input_data()),
            identifier_from_purchaser: crate::util::purchaser_identifier(&input.to_input_data()),
            input,
            blockchain_identifier: format!("bc-{}", Uuid::new_v4()),
            amounts: vec![Amount::lovelace(10_000_000)],
            pay_by_time: Utc::now() + chrono::Duration::hours(1),
        }
    }

    /// Behaviour every backend must share.
    pub(crate) async fn exercise_store(store: &dyn JobStore) {
        let job = store.create_job(new_job(&["addr1", "addr2"])).await.unwrap();
        assert_eq!(job.status, JobStatus::AwaitingPayment);
        assert_eq!(job.payment_status, PaymentStatus::Pending);

        let loaded = store.get_job(job.id).await.unwrap().expect("job exists");
        assert_eq!(loaded.input.addresses, vec!["addr1", "addr2"]);
        assert_eq!(loaded.amounts, vec![Amount::lovelace(10_000_000)]);
        assert_eq!(loaded.blockchain_identifier, job.blockchain_identifier);

        let awaiting = store.jobs_with_status(JobStatus::AwaitingPayment).await.unwrap();
        assert_eq!(awaiting.len(), 1);

        assert!(store.mark_running(job.id).await.unwrap());
        assert!(!store.mark_running(job.id).await.unwrap(), "second transition must be refused");

        let running = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.payment_status, PaymentStatus::Locked);
        assert!(store.jobs_with_status(JobStatus::AwaitingPayment).await.unwrap().is_empty());

        store
            .complete_job(job.id, "report", "hash", PaymentStatus::Completed)
            .await
            .unwrap();
        let done = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.payment_status, PaymentStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("report"));
        assert_eq!(done.result_hash.as_deref(), Some("hash"));

        assert!(store.fail_job(job.id, "late failure").await.is_err());

        let other = store.create_job(new_job(&["addr3"])).await.unwrap();
        store.fail_job(other.id, "payment not received").await.unwrap();
        let failed = store.get_job(other.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("payment not received"));
        assert!(!store.mark_running(other.id).await.unwrap());

        assert!(store.get_job(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.fail_job(Uuid::new_v4(), "missing").await.is_err());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            JobStatus::AwaitingPayment,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("pending"), None);
        assert_eq!(format!("{}", JobStatus::AwaitingPayment), "awaiting_payment");
        assert_eq!(format!("{}", PaymentStatus::Locked), "locked");
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::AwaitingPayment.is_terminal());
    }

    #[test]
    fn store_type_parsing_rejects_unknown_names() {
        assert_eq!("memory".parse::<JobStoreType>(), Ok(JobStoreType::Memory));
        assert_eq!(" DB ".parse::<JobStoreType>(), Ok(JobStoreType::Sqlite));
        assert!("memroy".parse::<JobStoreType>().is_err());
        assert_eq!(JobStoreType::default(), JobStoreType::Sqlite);
    }

    #[tokio::test]
    async fn memory_store_is_created_by_type() {
        let store = create_job_store(JobStoreType::Memory, PathBuf::from("unused"), "agent")
            .await
            .unwrap();
        assert!(!store.is_persistent());
    }
}
