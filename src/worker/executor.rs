use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::scheduler::job::{Job, JobOutcome, JobStatus};

/// Runs a single job to its final outcome.
///
/// A failed attempt is retried with exponential backoff until the retry
/// budget is spent or shutdown is cancelling. A running attempt is never
/// interrupted.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl JobExecutor {
    pub fn new(retry: RetryPolicy, shutdown: CancellationToken) -> Self {
        Self { retry, shutdown }
    }

    pub async fn execute(&self, worker_id: usize, job: &Job) -> JobOutcome {
        let started_at = Utc::now();
        let mut attempts = 0u32;

        let error = loop {
            attempts += 1;
            tracing::debug!(job_id = %job.id(), worker_id, attempt = attempts, "Executing job");

            let err = match job.run_attempt().await {
                Ok(()) => break None,
                Err(e) => e.to_string(),
            };

            if attempts > self.retry.max_retries {
                break Some(err);
            }
            if self.shutdown.is_cancelled() {
                tracing::debug!(job_id = %job.id(), worker_id, "Shutdown in progress, not retrying");
                break Some(err);
            }

            let delay = self.retry.backoff(attempts);
            tracing::info!(
                job_id = %job.id(),
                worker_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Job failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::debug!(job_id = %job.id(), worker_id, "Retry backoff cut short by shutdown");
                    break Some(err);
                }
            }
        };

        JobOutcome {
            job_id: job.id().clone(),
            worker_id: Some(worker_id),
            status: if error.is_none() {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            },
            attempts,
            error,
            started_at: Some(started_at),
            finished_at: Utc::now(),
        }
    }
}
