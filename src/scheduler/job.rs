use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinError;
use uuid::Uuid;

/// Failure reason returned by a job action.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

pub type JobResult = std::result::Result<(), JobError>;

type ActionFuture = Pin<Box<dyn Future<Output = JobResult> + Send>>;
type Action = Arc<dyn Fn() -> ActionFuture + Send + Sync>;

/// Opaque job identifier. Only used for logging and correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// An immutable unit of work: an identifier plus an action.
///
/// The action may be invoked more than once when retries are configured, so
/// it is `Fn` rather than `FnOnce`.
pub struct Job {
    id: JobId,
    action: Action,
    created_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job from an async action.
    pub fn new<F, Fut>(id: impl Into<JobId>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let action: Action = Arc::new(move || Box::pin(action()) as ActionFuture);
        Self {
            id: id.into(),
            action,
            created_at: Utc::now(),
        }
    }

    /// Creates a job whose action blocks the calling thread (file parsing,
    /// CPU-bound work). Each attempt runs on tokio's blocking pool.
    pub fn blocking<F>(id: impl Into<JobId>, action: F) -> Self
    where
        F: Fn() -> JobResult + Send + Sync + 'static,
    {
        let action = Arc::new(action);
        Self::new(id, move || {
            let action = Arc::clone(&action);
            async move {
                tokio::task::spawn_blocking(move || action())
                    .await
                    .unwrap_or_else(|e| Err(join_error_reason(e).into()))
            }
        })
    }

    /// Creates a job with a random UUID as identifier.
    pub fn anonymous<F, Fut>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        Self::new(Uuid::new_v4(), action)
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Runs one attempt of the action in its own task so that a panic is
    /// turned into a failure instead of unwinding through the worker.
    pub async fn run_attempt(&self) -> JobResult {
        match tokio::spawn((self.action)()).await {
            Ok(result) => result,
            Err(e) => Err(join_error_reason(e).into()),
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

fn join_error_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("job task failed: {}", err);
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("job panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("job panicked: {}", msg)
    } else {
        "job panicked".to_string()
    }
}

/// Final status of a job as seen by the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
    /// Still queued when the scheduler stopped without draining.
    Discarded,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Discarded => write!(f, "discarded"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub worker_id: Option<usize>,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub(crate) fn discarded(job: &Job) -> Self {
        Self {
            job_id: job.id().clone(),
            worker_id: None,
            status: JobStatus::Discarded,
            attempts: 0,
            error: None,
            started_at: None,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn run_attempt_success() {
        let job = Job::new("ok", || async { Ok(()) });
        assert!(job.run_attempt().await.is_ok());
    }

    #[tokio::test]
    async fn run_attempt_failure_keeps_reason() {
        let job = Job::new("bad", || async { Err("disk full".into()) });
        let err = job.run_attempt().await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[tokio::test]
    async fn run_attempt_catches_panic() {
        let job = Job::new("boom", || async { panic!("exploded") });
        let err = job.run_attempt().await.unwrap_err();
        assert_eq!(err.to_string(), "job panicked: exploded");
    }

    #[tokio::test]
    async fn blocking_job_runs_each_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let job = Job::blocking(7u64, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        job.run_attempt().await.unwrap();
        job.run_attempt().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn blocking_job_catches_panic() {
        let job = Job::blocking("blocking-boom", || panic!("bad parse"));
        let err = job.run_attempt().await.unwrap_err();
        assert_eq!(err.to_string(), "job panicked: bad parse");
    }

    #[test]
    fn job_id_conversions() {
        assert_eq!(JobId::from(42u64).as_str(), "42");
        assert_eq!(JobId::from("crawl-1").to_string(), "crawl-1");
        assert_eq!(JobId::from(String::from("etl")), JobId::from("etl"));
    }

    #[test]
    fn anonymous_job_gets_uuid() {
        let job = Job::anonymous(|| async { Ok(()) });
        assert!(Uuid::parse_str(job.id().as_str()).is_ok());
    }

    #[test]
    fn job_status_display() {
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
        assert_eq!(JobStatus::Discarded.to_string(), "discarded");
    }
}
