//! Worker execution units of the pool.
//!
//! A worker is a long-lived tokio task that repeatedly:
//!
//! 1. Checks the shutdown token at the top of its loop
//! 2. Registers an [`IdleWorker`] hand-off slot with the dispatcher
//! 3. Waits `Idle` until the dispatcher assigns it a job
//! 4. Runs the job to completion via [`JobExecutor`] while `Busy`
//! 5. Reports the outcome and goes back to step 1
//!
//! A worker only stops from `Idle`. The in-flight job is always finished first.
//!
//! # Components
//!
//! - [`JobExecutor`]: runs one job with retries and panic isolation
//! - [`reporter`]: the [`JobReporter`] boundary where outcomes are surfaced

pub mod executor;
pub mod reporter;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::scheduler::dispatcher::{IdleWorker, PoolContext};

pub use executor::JobExecutor;
pub use reporter::{FailureCollector, JobReporter, TracingReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy,
    Stopped,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Busy,
            _ => WorkerState::Stopped,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Busy => write!(f, "busy"),
            WorkerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Current state of every worker in a pool, indexed by worker id.
///
/// Slots start out `Stopped` since no task exists until the pool is spawned.
#[derive(Debug)]
pub struct WorkerStates {
    states: Vec<AtomicU8>,
}

impl WorkerStates {
    pub fn new(workers: usize) -> Self {
        Self {
            states: (0..workers)
                .map(|_| AtomicU8::new(WorkerState::Stopped as u8))
                .collect(),
        }
    }

    pub fn get(&self, worker_id: usize) -> Option<WorkerState> {
        self.states
            .get(worker_id)
            .map(|s| WorkerState::from_u8(s.load(Ordering::Acquire)))
    }

    pub(crate) fn set(&self, worker_id: usize, state: WorkerState) {
        if let Some(slot) = self.states.get(worker_id) {
            slot.store(state as u8, Ordering::Release);
        }
    }

    pub(crate) fn mark_all(&self, state: WorkerState) {
        for slot in &self.states {
            slot.store(state as u8, Ordering::Release);
        }
    }

    pub fn snapshot(&self) -> Vec<WorkerState> {
        self.states
            .iter()
            .map(|s| WorkerState::from_u8(s.load(Ordering::Acquire)))
            .collect()
    }

    pub fn count(&self, state: WorkerState) -> usize {
        self.snapshot().into_iter().filter(|s| *s == state).count()
    }
}

pub(crate) struct Worker {
    id: usize,
    registry: mpsc::Sender<IdleWorker>,
    executor: JobExecutor,
    pool: Arc<PoolContext>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        registry: mpsc::Sender<IdleWorker>,
        executor: JobExecutor,
        pool: Arc<PoolContext>,
    ) -> Self {
        Self {
            id,
            registry,
            executor,
            pool,
        }
    }

    /// Worker loop. Returns the worker id once the worker has stopped.
    pub(crate) async fn run(self) -> usize {
        tracing::debug!(worker_id = self.id, "Worker started");

        loop {
            if self.pool.shutdown.is_cancelled() {
                break;
            }

            self.pool.states.set(self.id, WorkerState::Idle);
            let (idle, slot) = IdleWorker::new(self.id);
            if self.registry.send(idle).await.is_err() {
                // Dispatcher has exited, no more work will arrive
                break;
            }

            let job = tokio::select! {
                biased;
                assigned = slot => match assigned {
                    Ok(job) => job,
                    // Slot dropped by a dispatcher that is shutting down
                    Err(_) => break,
                },
                _ = self.pool.shutdown.cancelled() => break,
            };

            self.pool.states.set(self.id, WorkerState::Busy);
            let outcome = self.executor.execute(self.id, &job).await;
            self.pool.record(&outcome);
        }

        self.pool.states.set(self.id, WorkerState::Stopped);
        tracing::debug!(worker_id = self.id, "Worker stopped");
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_states_start_stopped() {
        let states = WorkerStates::new(3);
        assert_eq!(states.snapshot(), vec![WorkerState::Stopped; 3]);
        assert_eq!(states.count(WorkerState::Idle), 0);

        states.mark_all(WorkerState::Idle);
        assert_eq!(states.count(WorkerState::Idle), 3);
    }

    #[test]
    fn worker_states_track_transitions() {
        let states = WorkerStates::new(2);
        states.set(0, WorkerState::Busy);
        states.set(1, WorkerState::Stopped);

        assert_eq!(states.get(0), Some(WorkerState::Busy));
        assert_eq!(states.get(1), Some(WorkerState::Stopped));
        assert_eq!(states.get(2), None);
        assert_eq!(states.count(WorkerState::Busy), 1);
    }

    #[test]
    fn worker_state_display() {
        assert_eq!(WorkerState::Idle.to_string(), "idle");
        assert_eq!(WorkerState::Busy.to_string(), "busy");
        assert_eq!(WorkerState::Stopped.to_string(), "stopped");
    }
}
