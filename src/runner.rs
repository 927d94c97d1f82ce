//! Job execution.
//!
//! A job reaches the runner once its funds are locked. The runner claims it
//! (`awaiting_payment` -> `running`), runs the agent under a concurrency limit
//! and a timeout, hashes the result and submits the hash to the payment
//! service to claim the funds.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::agent::{AgentError, AgentRef};
use crate::jobs::{JobStatus, JobStoreRef, PaymentStatus};
use crate::payment::PaymentServiceRef;
use crate::util::sha256_hex;

/// Reason recorded for jobs whose execution died with the previous process.
pub const INTERRUPTED_REASON: &str = "interrupted by service restart";

pub struct JobRunner {
    store: JobStoreRef,
    payments: PaymentServiceRef,
    agent: AgentRef,
    permits: Arc<Semaphore>,
    agent_timeout: Duration,
}

impl JobRunner {
    pub fn new(
        store: JobStoreRef,
        payments: PaymentServiceRef,
        agent: AgentRef,
        max_concurrent_jobs: usize,
        agent_timeout: Duration,
    ) -> Self {
        Self {
            store,
            payments,
            agent,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            agent_timeout,
        }
    }

    /// Execute a job whose payment is locked.
    ///
    /// Returns `Ok(false)` if the job was not awaiting payment (already
    /// claimed by an earlier call, or finished).
    pub async fn execute_job(&self, job_id: Uuid) -> Result<bool, String> {
        if !self.store.mark_running(job_id).await? {
            tracing::debug!("Job {} was not awaiting payment, skipping", job_id);
            return Ok(false);
        }

        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| format!("Job {} disappeared after being claimed", job_id))?;

        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| format!("Job runner closed: {}", e))?;

        tracing::info!(
            "Running job {} with agent {} ({} addresses)",
            job_id,
            self.agent.name(),
            job.input.addresses.len()
        );

        let outcome = match tokio::time::timeout(self.agent_timeout, self.agent.execute(&job.input)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AgentError::Timeout(self.agent_timeout.as_secs())),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Job {} failed: {}", job_id, e);
                self.store.fail_job(job_id, &e.to_string()).await?;
                return Ok(true);
            }
        };

        let result_hash = sha256_hex(&result);
        let payment_status = match self
            .payments
            .complete_payment(&job.blockchain_identifier, &result_hash)
            .await
        {
            Ok(()) => PaymentStatus::Completed,
            Err(e) => {
                tracing::error!(
                    "Job {} produced a result but submitting its hash failed: {}",
                    job_id,
                    e
                );
                PaymentStatus::Failed
            }
        };

        self.store
            .complete_job(job_id, &result, &result_hash, payment_status)
            .await?;
        tracing::info!(
            "Job {} completed (payment {}, result hash {})",
            job_id,
            payment_status,
            result_hash
        );
        Ok(true)
    }

    /// Fail jobs left `running` by a previous process.
    pub async fn recover_interrupted(&self) -> Result<usize, String> {
        let orphaned = self.store.jobs_with_status(JobStatus::Running).await?;
        for job in &orphaned {
            tracing::warn!("Job {} was running when the service stopped", job.id);
            self.store.fail_job(job.id, INTERRUPTED_REASON).await?;
        }
        Ok(orphaned.len())
    }
}
