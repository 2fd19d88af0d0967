//! Job scheduling: queue, dispatch and the [`Scheduler`] facade.
//!
//! Submitted jobs wait in a FIFO [`JobQueue`]. A single dispatcher task takes
//! the head job and hands it to whichever worker registered as idle first, so
//! dispatch follows submission order while completion order is unconstrained.

pub mod dispatcher;
pub mod job;
pub mod queue;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{SchedulerConfig, ShutdownPolicy};
use crate::error::{Result, SchedulerError};
use crate::worker::{JobReporter, TracingReporter, WorkerState};

use dispatcher::{PoolContext, WorkerPool};
use queue::EnqueueError;

pub use job::{Job, JobError, JobId, JobOutcome, JobResult, JobStatus};
pub use queue::JobQueue;
pub use stats::{SchedulerStats, ShutdownSummary};

enum Lifecycle {
    Created,
    Running {
        pool: WorkerPool,
        started_at: Instant,
    },
    /// `stop` has begun. The pool stays here until every task is joined, so a
    /// `stop` whose future was dropped can be resumed by the next call.
    Stopping {
        pool: WorkerPool,
        started_at: Instant,
    },
    Stopped(ShutdownSummary),
}

impl Lifecycle {
    /// Moves `Running` to `Stopping`. Other states are left untouched.
    fn begin_stopping(&mut self) {
        if let Lifecycle::Running { .. } = self {
            if let Lifecycle::Running { pool, started_at } =
                std::mem::replace(self, Lifecycle::Created)
            {
                *self = Lifecycle::Stopping { pool, started_at };
            }
        }
    }
}

/// Bounded worker-pool job scheduler.
///
/// Lifecycle: [`Scheduler::start`] once, [`Scheduler::submit`] any number of
/// times, [`Scheduler::stop`] once the host is done. All methods take `&self`
/// so the scheduler can be shared behind an `Arc`.
///
/// - Submitting before `start` is allowed; jobs wait in the queue.
/// - `start` on a scheduler that was already started (or stopped) returns
///   [`SchedulerError::AlreadyStarted`]. A stopped scheduler cannot be restarted.
/// - `submit` after `stop` began returns [`SchedulerError::ShuttingDown`].
/// - With a bounded queue, `submit` on a full queue returns
///   [`SchedulerError::QueueFull`] immediately instead of waiting.
/// - `stop` is idempotent. Later calls return the first call's summary.
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<JobQueue>,
    pool: Arc<PoolContext>,
    lifecycle: Mutex<Lifecycle>,
}

impl Scheduler {
    /// Creates a scheduler that reports job outcomes through `tracing`.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_reporter(config, Arc::new(TracingReporter))
    }

    pub fn with_reporter(config: SchedulerConfig, reporter: Arc<dyn JobReporter>) -> Result<Self> {
        config.validate()?;

        let queue = match config.queue_capacity {
            Some(capacity) => JobQueue::with_capacity(capacity),
            None => JobQueue::new(),
        };
        let pool = PoolContext::new(config.workers, reporter, CancellationToken::new());

        Ok(Self {
            config,
            queue: Arc::new(queue),
            pool: Arc::new(pool),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Token observed by the dispatcher and workers.
    ///
    /// Cancelling it stops dispatch and releases idle workers as if a
    /// [`ShutdownPolicy::Cancel`] stop had begun. `stop` must still be awaited
    /// to join the tasks.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.pool.shutdown.clone()
    }

    /// Spawns the workers and the dispatcher on the current tokio runtime.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Created) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let pool = WorkerPool::spawn(&self.config, self.queue.clone(), self.pool.clone());
        *lifecycle = Lifecycle::Running {
            pool,
            started_at: Instant::now(),
        };

        tracing::info!(
            workers = self.config.workers,
            policy = %self.config.shutdown_policy,
            "Scheduler started"
        );
        Ok(())
    }

    /// Queues a job for execution. Never waits.
    pub fn submit(&self, job: Job) -> Result<JobId> {
        if self.pool.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown {
                job_id: job.id().clone(),
            });
        }

        let job_id = job.id().clone();
        match self.queue.enqueue(job) {
            Ok(()) => {
                self.pool.counters.submitted();
                tracing::debug!(job_id = %job_id, "Job submitted");
                Ok(job_id)
            }
            Err(EnqueueError::Closed(job)) => Err(SchedulerError::ShuttingDown {
                job_id: job.id().clone(),
            }),
            Err(EnqueueError::Full(job)) => {
                tracing::warn!(job_id = %job.id(), "Job queue at capacity, job rejected");
                Err(SchedulerError::QueueFull {
                    job_id: job.id().clone(),
                    capacity: self.queue.capacity().unwrap_or_default(),
                })
            }
        }
    }

    /// Stops the scheduler according to the configured [`ShutdownPolicy`] and
    /// waits until every worker has stopped.
    ///
    /// - `Drain`: queued jobs still run, then the workers stop.
    /// - `Cancel`: in-flight jobs finish, queued jobs are discarded.
    ///
    /// A scheduler that was never started has nobody to run its queue, so
    /// pending jobs are discarded under either policy.
    ///
    /// Cancel safe: if the returned future is dropped before it completes, the
    /// next call resumes waiting for the same workers.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> ShutdownSummary {
        let mut lifecycle = self.lifecycle.lock().await;

        match &*lifecycle {
            Lifecycle::Stopped(summary) => {
                tracing::debug!("Scheduler already stopped");
                return summary.clone();
            }
            Lifecycle::Stopping { .. } => tracing::debug!("Resuming interrupted stop"),
            Lifecycle::Created | Lifecycle::Running { .. } => {
                tracing::info!(queued = self.queue.len(), "Scheduler stopping");
            }
        }
        lifecycle.begin_stopping();

        // No new submissions from here on
        self.queue.close();
        let never_started = matches!(*lifecycle, Lifecycle::Created);
        if never_started || self.config.shutdown_policy == ShutdownPolicy::Cancel {
            self.pool.shutdown.cancel();
        }

        let started_at = match &mut *lifecycle {
            Lifecycle::Stopping { pool, started_at } => {
                // Dropping this future here leaves the pool in `Stopping`
                for e in pool.join().await {
                    tracing::error!(error = %e, "Worker pool reported an error during shutdown");
                }
                Some(*started_at)
            }
            _ => None,
        };
        // Dispatch is over; anything left never started
        self.pool.shutdown.cancel();

        let leftover = self.queue.drain();
        for job in &leftover {
            self.pool.discard(job);
        }
        if !leftover.is_empty() {
            tracing::warn!(discarded = leftover.len(), "Discarded queued jobs at shutdown");
        }

        let summary = ShutdownSummary {
            policy: self.config.shutdown_policy,
            stats: self.stats(),
            elapsed_ms: started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or_default(),
        };
        *lifecycle = Lifecycle::Stopped(summary.clone());

        tracing::info!(
            completed = summary.stats.completed,
            failed = summary.stats.failed,
            discarded = summary.stats.discarded,
            "Scheduler stopped"
        );
        summary
    }

    pub fn stats(&self) -> SchedulerStats {
        self.pool.counters.snapshot(
            self.queue.len(),
            self.pool.states.count(WorkerState::Busy),
            self.config.workers,
        )
    }

    /// State of each worker, indexed by worker id.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.states.snapshot()
    }

    /// Number of workers that have not reached `Stopped`. Each worker records
    /// its own exit, so this is zero before `start` and after `stop`.
    pub fn live_workers(&self) -> usize {
        self.config.workers - self.pool.states.count(WorkerState::Stopped)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Release the tasks of a scheduler dropped without `stop`
        self.queue.close();
        self.pool.shutdown.cancel();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
