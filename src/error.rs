use thiserror::Error;

use crate::scheduler::JobId;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler already started")]
    AlreadyStarted,

    #[error("Scheduler is shutting down, job {job_id} rejected")]
    ShuttingDown { job_id: JobId },

    #[error("Job queue full (capacity {capacity}), job {job_id} rejected")]
    QueueFull { job_id: JobId, capacity: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker {worker_id} panicked")]
    WorkerPanicked { worker_id: usize },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
