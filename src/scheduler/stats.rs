use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::ShutdownPolicy;
use crate::scheduler::job::{JobOutcome, JobStatus};

/// Point-in-time view of a scheduler's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub discarded: u64,
    /// Extra attempts spent on retries, across all jobs.
    pub retried: u64,
    pub queued: usize,
    pub busy_workers: usize,
    pub workers: usize,
}

/// Returned by `Scheduler::stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownSummary {
    pub policy: ShutdownPolicy,
    pub stats: SchedulerStats,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    retried: AtomicU64,
}

impl Counters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, outcome: &JobOutcome) {
        let counter = match outcome.status {
            JobStatus::Completed => &self.completed,
            JobStatus::Failed => &self.failed,
            JobStatus::Discarded => &self.discarded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if outcome.attempts > 1 {
            self.retried
                .fetch_add(u64::from(outcome.attempts - 1), Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self, queued: usize, busy_workers: usize, workers: usize) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            queued,
            busy_workers,
            workers,
        }
    }
}
