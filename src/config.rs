use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, SchedulerError};

const DEFAULT_WORKERS: usize = 4;

/// What `Scheduler::stop` does with jobs that are still queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Stop accepting submissions, run everything already queued, then stop
    /// the workers once the queue is empty.
    #[default]
    Drain,
    /// Stop as soon as in-flight jobs finish. Queued jobs are discarded.
    Cancel,
}

impl std::fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPolicy::Drain => write!(f, "drain"),
            ShutdownPolicy::Cancel => write!(f, "cancel"),
        }
    }
}

/// Exponential backoff applied between attempts of a failing job.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure. Zero disables retries.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Configuration for a [`Scheduler`](crate::scheduler::Scheduler) instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of workers, i.e. the maximum number of jobs running at once.
    pub workers: usize,
    /// Maximum number of pending jobs. `None` means unbounded.
    pub queue_capacity: Option<usize>,
    pub shutdown_policy: ShutdownPolicy,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            shutdown_policy: ShutdownPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "queue_capacity must be at least 1 when set".to_string(),
            ));
        }
        if self.retry.factor.is_nan() || self.retry.factor < 1.0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "retry factor must be >= 1.0, got {}",
                self.retry.factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_default() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.workers, 4);
        assert!(cfg.queue_capacity.is_none());
        assert_eq!(cfg.shutdown_policy, ShutdownPolicy::Drain);
        assert_eq!(cfg.retry.max_retries, 0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn scheduler_config_builders() {
        let cfg = SchedulerConfig::new(2)
            .with_queue_capacity(16)
            .with_shutdown_policy(ShutdownPolicy::Cancel)
            .with_retry(RetryPolicy::new(3));
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.queue_capacity, Some(16));
        assert_eq!(cfg.shutdown_policy, ShutdownPolicy::Cancel);
        assert_eq!(cfg.retry.max_retries, 3);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let err = SchedulerConfig::new(0).validate().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let err = SchedulerConfig::new(1)
            .with_queue_capacity(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn validate_rejects_shrinking_backoff() {
        let mut retry = RetryPolicy::new(1);
        retry.factor = 0.5;
        let err = SchedulerConfig::new(1).with_retry(retry).validate().unwrap_err();
        assert!(err.to_string().contains("factor"));
    }

    #[test]
    fn backoff_grows_exponentially() {
        let retry = RetryPolicy::new(5);
        assert_eq!(retry.backoff(0), Duration::ZERO);
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let retry = RetryPolicy::new(100);
        assert_eq!(retry.backoff(10), Duration::from_secs(5));
        assert_eq!(retry.backoff(100), Duration::from_secs(5));
        assert_eq!(retry.backoff(5000), Duration::from_secs(5));
    }

    #[test]
    fn backoff_saturates_for_huge_retry_numbers() {
        let retry = RetryPolicy::new(u32::MAX);
        assert_eq!(retry.backoff(i32::MAX as u32 + 2), Duration::from_secs(5));
        assert_eq!(retry.backoff(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn shutdown_policy_display() {
        assert_eq!(ShutdownPolicy::Drain.to_string(), "drain");
        assert_eq!(ShutdownPolicy::Cancel.to_string(), "cancel");
    }
}
