//! In-memory job store (non-persistent).

use super::{Job, JobStatus, JobStore, NewJob, PaymentStatus};
use crate::util::now_string;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `finish` to a non-terminal job.
fn finish_job<F>(jobs: &mut HashMap<Uuid, Job>, id: Uuid, finish: F) -> Result<(), String>
where
    F: FnOnce(&mut Job),
{
    let job = jobs
        .get_mut(&id)
        .ok_or_else(|| format!("Job {} not found", id))?;
    if job.status.is_terminal() {
        return Err(format!("Job {} is already {}", id, job.status));
    }
    finish(job);
    job.updated_at = now_string();
    Ok(())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn create_job(&self, new_job: NewJob) -> Result<Job, String> {
        let now = now_string();
        let job = Job {
            id: Uuid::new_v4(),
            status: JobStatus::AwaitingPayment,
            payment_status: PaymentStatus::Pending,
            input: new_job.input,
            input_hash: new_job.input_hash,
            identifier_from_purchaser: new_job.identifier_from_purchaser,
            blockchain_identifier: new_job.blockchain_identifier,
            amounts: new_job.amounts,
            pay_by_time: new_job.pay_by_time,
            result: None,
            result_hash: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, String> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, String> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn mark_running(&self, id: Uuid) -> Result<bool, String> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| format!("Job {} not found", id))?;
        if job.status != JobStatus::AwaitingPayment {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.payment_status = PaymentStatus::Locked;
        job.updated_at = now_string();
        Ok(true)
    }

    async fn complete_job(
        &self,
        id: Uuid,
        result: &str,
        result_hash: &str,
        payment_status: PaymentStatus,
    ) -> Result<(), String> {
        let mut jobs = self.jobs.write().await;
        finish_job(&mut jobs, id, |job| {
            job.status = JobStatus::Completed;
            job.payment_status = payment_status;
            job.result = Some(result.to_string());
            job.result_hash = Some(result_hash.to_string());
        })
    }

    async fn fail_job(&self, id: Uuid, reason: &str) -> Result<(), String> {
        let mut jobs = self.jobs.write().await;
        finish_job(&mut jobs, id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(reason.to_string());
        })
    }
}
