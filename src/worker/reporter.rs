use std::sync::{Mutex, PoisonError};

use crate::scheduler::job::JobOutcome;

/// Receives the final outcome of every job.
///
/// Hosts plug in their own error aggregation here. Implementations are called
/// from worker tasks and must not block for long.
pub trait JobReporter: Send + Sync {
    fn job_completed(&self, _outcome: &JobOutcome) {}

    fn job_failed(&self, outcome: &JobOutcome);

    fn job_discarded(&self, _outcome: &JobOutcome) {}
}

/// Logs outcomes through `tracing`. Used when the host supplies no reporter.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl JobReporter for TracingReporter {
    fn job_completed(&self, outcome: &JobOutcome) {
        tracing::debug!(
            job_id = %outcome.job_id,
            worker_id = ?outcome.worker_id,
            attempts = outcome.attempts,
            "Job completed"
        );
    }

    fn job_failed(&self, outcome: &JobOutcome) {
        tracing::warn!(
            job_id = %outcome.job_id,
            worker_id = ?outcome.worker_id,
            attempts = outcome.attempts,
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "Job failed"
        );
    }

    fn job_discarded(&self, outcome: &JobOutcome) {
        tracing::warn!(job_id = %outcome.job_id, "Job discarded at shutdown");
    }
}

/// Collects failed outcomes so they can be inspected or combined after a run.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Mutex<Vec<JobOutcome>>,
    discarded: Mutex<Vec<JobOutcome>>,
}

impl FailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<JobOutcome> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn discarded(&self) -> Vec<JobOutcome> {
        self.discarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Joins every failure into one message, or `None` if nothing failed.
    pub fn aggregate(&self) -> Option<String> {
        let failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if failures.is_empty() {
            return None;
        }
        let messages: Vec<String> = failures
            .iter()
            .map(|o| {
                format!(
                    "{}: {}",
                    o.job_id,
                    o.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        Some(messages.join(", "))
    }
}

impl JobReporter for FailureCollector {
    fn job_failed(&self, outcome: &JobOutcome) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome.clone());
    }

    fn job_discarded(&self, outcome: &JobOutcome) {
        self.discarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome.clone());
    }
}
