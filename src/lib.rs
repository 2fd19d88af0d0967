//! A bounded worker-pool job scheduler.
//!
//! Jobs are submitted to a [`Scheduler`], queued in FIFO order and handed by a
//! dispatcher to a fixed pool of tokio worker tasks. Shutdown either drains the
//! queue or discards it, per [`ShutdownPolicy`], and always waits for every
//! worker to stop.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use config::{RetryPolicy, SchedulerConfig, ShutdownPolicy};
pub use error::{Result, SchedulerError};
pub use scheduler::{
    Job, JobError, JobId, JobOutcome, JobResult, JobStatus, Scheduler, SchedulerStats,
    ShutdownSummary,
};
pub use worker::{FailureCollector, JobReporter, TracingReporter, WorkerState};
