//! Payment status monitoring.
//!
//! One background task polls the payment service for every job awaiting
//! payment and hands jobs whose funds are locked to the [`JobRunner`].
//! The job store is the source of truth, so jobs created before a restart
//! are picked up again without extra bookkeeping.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::jobs::{Job, JobStatus, JobStoreRef};
use crate::payment::PaymentServiceRef;
use crate::runner::JobRunner;

/// Reason recorded for jobs whose purchaser never paid.
pub const PAYMENT_EXPIRED_REASON: &str = "payment not received before pay-by time";

/// Payment state lookups in flight at once during a poll.
const STATE_CHECK_CONCURRENCY: usize = 8;

/// What a single poll did.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Executions started for jobs whose funds are locked
    pub started: Vec<JoinHandle<()>>,
    /// Jobs failed because the pay-by time passed
    pub expired: usize,
    /// Jobs failed because the payment was refunded, disputed or invalid
    pub abandoned: usize,
    /// Jobs still waiting for funds
    pub waiting: usize,
    /// Jobs that could not be updated; retried next poll
    pub errors: usize,
}

pub struct PaymentMonitor {
    store: JobStoreRef,
    payments: PaymentServiceRef,
    runner: Arc<JobRunner>,
    interval: Duration,
}

impl PaymentMonitor {
    /// `payments` should not retry internally: a failed lookup is simply
    /// repeated on the next poll.
    pub fn new(
        store: JobStoreRef,
        payments: PaymentServiceRef,
        runner: Arc<JobRunner>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            payments,
            runner,
            interval,
        }
    }

    /// Check every job awaiting payment once.
    ///
    /// Only listing the jobs can fail the poll; problems with a single job are
    /// logged and counted.
    pub async fn poll_once(&self) -> Result<PollOutcome, String> {
        let mut outcome = PollOutcome::default();
        let jobs = self.store.jobs_with_status(JobStatus::AwaitingPayment).await?;

        let mut checks = Vec::with_capacity(jobs.len());
        for batch in jobs.chunks(STATE_CHECK_CONCURRENCY) {
            let lookups = batch
                .iter()
                .map(|job| self.payments.payment_state(&job.blockchain_identifier));
            checks.extend(batch.iter().cloned().zip(join_all(lookups).await));
        }

        for (job, state) in checks {
            let state = match state {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(
                        "Could not check payment {} for job {}: {}",
                        job.blockchain_identifier,
                        job.id,
                        e
                    );
                    outcome.waiting += 1;
                    continue;
                }
            };

            if state.is_funds_locked() {
                tracing::info!("Funds locked for job {}, starting execution", job.id);
                outcome.started.push(self.start(job.id));
            } else if state.is_abandoned() {
                tracing::warn!("Payment for job {} ended in state {}", job.id, state);
                if self.fail(&job, &format!("payment {}", state)).await {
                    outcome.abandoned += 1;
                } else {
                    outcome.errors += 1;
                }
            } else if Utc::now() > job.pay_by_time {
                tracing::info!("Job {} expired waiting for payment", job.id);
                if self.fail(&job, PAYMENT_EXPIRED_REASON).await {
                    outcome.expired += 1;
                } else {
                    outcome.errors += 1;
                }
            } else {
                outcome.waiting += 1;
            }
        }

        Ok(outcome)
    }

    fn start(&self, job_id: uuid::Uuid) -> JoinHandle<()> {
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            if let Err(e) = runner.execute_job(job_id).await {
                tracing::error!("Execution of job {} aborted: {}", job_id, e);
            }
        })
    }

    async fn fail(&self, job: &Job, reason: &str) -> bool {
        match self.store.fail_job(job.id, reason).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to record failure of job {}: {}", job.id, e);
                false
            }
        }
    }

    /// Poll on the configured interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Payment monitor polling every {:?}", self.interval);
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Payment monitor stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        match self.poll_once().await {
                            Ok(outcome) => {
                                if !outcome.started.is_empty()
                                    || outcome.expired > 0
                                    || outcome.abandoned > 0
                                    || outcome.errors > 0
                                {
                                    tracing::debug!(
                                        "Payment poll: {} started, {} expired, {} abandoned, {} waiting, {} errors",
                                        outcome.started.len(),
                                        outcome.expired,
                                        outcome.abandoned,
                                        outcome.waiting,
                                        outcome.errors
                                    );
                                }
                            }
                            Err(e) => tracing::error!("Payment poll failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}
