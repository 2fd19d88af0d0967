use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::scheduler::job::{Job, JobOutcome, JobStatus};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::stats::Counters;
use crate::worker::{JobExecutor, JobReporter, Worker, WorkerState, WorkerStates};

/// State shared by the dispatcher and every worker of one pool.
pub(crate) struct PoolContext {
    pub(crate) reporter: Arc<dyn JobReporter>,
    pub(crate) counters: Counters,
    pub(crate) states: WorkerStates,
    pub(crate) shutdown: CancellationToken,
}

impl PoolContext {
    pub(crate) fn new(
        workers: usize,
        reporter: Arc<dyn JobReporter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reporter,
            counters: Counters::default(),
            states: WorkerStates::new(workers),
            shutdown,
        }
    }

    pub(crate) fn record(&self, outcome: &JobOutcome) {
        self.counters.record(outcome);
        match outcome.status {
            JobStatus::Completed => self.reporter.job_completed(outcome),
            JobStatus::Failed => self.reporter.job_failed(outcome),
            JobStatus::Discarded => self.reporter.job_discarded(outcome),
        }
    }

    pub(crate) fn discard(&self, job: &Job) {
        self.record(&JobOutcome::discarded(job));
    }
}

/// Registration of an idle worker: a one-shot slot the dispatcher fills
/// with the next job.
#[derive(Debug)]
pub struct IdleWorker {
    worker_id: usize,
    slot: oneshot::Sender<Job>,
}

impl IdleWorker {
    pub fn new(worker_id: usize) -> (Self, oneshot::Receiver<Job>) {
        let (slot, rx) = oneshot::channel();
        (Self { worker_id, slot }, rx)
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Hands the job to the worker. Gives the job back if the worker stopped
    /// waiting in the meantime.
    pub fn assign(self, job: Job) -> Result<usize, Job> {
        self.slot.send(job).map(|()| self.worker_id)
    }
}

/// Pairs the next queued job with the next idle worker.
pub(crate) struct Dispatcher {
    queue: Arc<JobQueue>,
    registry: mpsc::Receiver<IdleWorker>,
    pool: Arc<PoolContext>,
}

impl Dispatcher {
    pub(crate) fn new(
        queue: Arc<JobQueue>,
        registry: mpsc::Receiver<IdleWorker>,
        pool: Arc<PoolContext>,
    ) -> Self {
        Self {
            queue,
            registry,
            pool,
        }
    }

    /// Runs until the queue is closed and empty, or shutdown is cancelled.
    ///
    /// Returning drops the registry, which releases every waiting worker.
    pub(crate) async fn run(mut self) {
        tracing::debug!("Dispatcher started");

        while let Some(job) = self.next_job().await {
            if let Some(job) = self.hand_off(job).await {
                self.pool.discard(&job);
                break;
            }
        }

        tracing::debug!("Dispatcher stopped");
    }

    async fn next_job(&self) -> Option<Job> {
        tokio::select! {
            biased;
            _ = self.pool.shutdown.cancelled() => None,
            job = self.queue.recv() => job,
        }
    }

    /// Returns the job if no worker could take it before shutdown.
    async fn hand_off(&mut self, mut job: Job) -> Option<Job> {
        loop {
            let idle = tokio::select! {
                biased;
                _ = self.pool.shutdown.cancelled() => return Some(job),
                idle = self.registry.recv() => idle,
            };
            let Some(idle) = idle else {
                // Every worker has exited
                return Some(job);
            };

            let worker_id = idle.worker_id();
            match idle.assign(job) {
                Ok(_) => {
                    tracing::trace!(worker_id, "Job dispatched");
                    return None;
                }
                Err(returned) => {
                    tracing::debug!(worker_id, job_id = %returned.id(), "Worker left before hand-off");
                    job = returned;
                }
            }
        }
    }
}

/// The running tasks of one scheduler: a dispatcher plus a fixed set of workers.
///
/// Handles are released only once their task has been joined, so a `join`
/// that is dropped midway can be called again and picks up where it stopped.
pub(crate) struct WorkerPool {
    dispatcher: Option<JoinHandle<()>>,
    // Indexed by worker id
    workers: Vec<Option<JoinHandle<usize>>>,
    pool: Arc<PoolContext>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        config: &SchedulerConfig,
        queue: Arc<JobQueue>,
        pool: Arc<PoolContext>,
    ) -> Self {
        let (registry_tx, registry_rx) = mpsc::channel(config.workers);
        pool.states.mark_all(WorkerState::Idle);

        let workers = (0..config.workers)
            .map(|id| {
                let executor = JobExecutor::new(config.retry.clone(), pool.shutdown.clone());
                let worker = Worker::new(id, registry_tx.clone(), executor, pool.clone());
                Some(tokio::spawn(worker.run()))
            })
            .collect();
        drop(registry_tx);

        let dispatcher = tokio::spawn(Dispatcher::new(queue, registry_rx, pool.clone()).run());

        Self {
            dispatcher: Some(dispatcher),
            workers,
            pool,
        }
    }

    /// Waits for the dispatcher and every worker to exit.
    ///
    /// Cancel safe: tasks joined before the future was dropped are not
    /// awaited again.
    pub(crate) async fn join(&mut self) -> Vec<SchedulerError> {
        let mut errors = Vec::new();

        if let Some(handle) = self.dispatcher.as_mut() {
            let result = handle.await;
            self.dispatcher = None;
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatcher task failed");
            }
        }

        for worker_id in 0..self.workers.len() {
            let Some(handle) = self.workers[worker_id].as_mut() else {
                continue;
            };
            let result = handle.await;
            self.workers[worker_id] = None;
            if let Err(e) = result {
                // The task never reached its own exit path
                self.pool.states.set(worker_id, WorkerState::Stopped);
                tracing::error!(worker_id, error = %e, "Worker task failed");
                errors.push(SchedulerError::WorkerPanicked { worker_id });
            }
        }
        tracing::debug!("Worker pool joined");

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::FailureCollector;

    fn noop(id: &str) -> Job {
        Job::new(id, || async { Ok(()) })
    }

    #[test]
    fn idle_worker_assign_delivers_job() {
        let (idle, mut slot) = IdleWorker::new(4);
        assert_eq!(idle.worker_id(), 4);
        assert_eq!(idle.assign(noop("a")).unwrap(), 4);
        assert_eq!(slot.try_recv().unwrap().id().as_str(), "a");
    }

    #[test]
    fn idle_worker_assign_returns_job_when_worker_gone() {
        let (idle, slot) = IdleWorker::new(0);
        drop(slot);
        let job = idle.assign(noop("b")).unwrap_err();
        assert_eq!(job.id().as_str(), "b");
    }

    #[tokio::test]
    async fn dispatcher_hands_jobs_out_in_fifo_order() {
        let queue = Arc::new(JobQueue::new());
        let (registry_tx, registry_rx) = mpsc::channel(1);
        let pool = Arc::new(PoolContext::new(
            1,
            Arc::new(FailureCollector::new()),
            CancellationToken::new(),
        ));
        for id in ["j1", "j2", "j3"] {
            queue.enqueue(noop(id)).unwrap();
        }
        queue.close();

        let handle = tokio::spawn(Dispatcher::new(queue, registry_rx, pool).run());

        let mut received = Vec::new();
        for _ in 0..3 {
            let (idle, slot) = IdleWorker::new(0);
            registry_tx.send(idle).await.unwrap();
            received.push(slot.await.unwrap().id().to_string());
        }
        assert_eq!(received, vec!["j1", "j2", "j3"]);

        // Queue closed and empty: the dispatcher exits and drops the registry
        handle.await.unwrap();
        assert!(registry_tx.is_closed());
    }

    #[tokio::test]
    async fn dispatcher_discards_held_job_on_cancel() {
        let queue = Arc::new(JobQueue::new());
        let (_registry_tx, registry_rx) = mpsc::channel::<IdleWorker>(1);
        let collector = Arc::new(FailureCollector::new());
        let token = CancellationToken::new();
        let pool = Arc::new(PoolContext::new(1, collector.clone(), token.clone()));
        queue.enqueue(noop("stuck")).unwrap();

        let handle = tokio::spawn(Dispatcher::new(queue.clone(), registry_rx, pool).run());
        // No worker ever registers, so the dispatcher holds the job until cancelled
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        token.cancel();
        handle.await.unwrap();

        let discarded = collector.discarded();
        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].job_id.as_str(), "stuck");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn worker_pool_join_resumes_after_being_dropped() {
        let queue = Arc::new(JobQueue::new());
        let pool = Arc::new(PoolContext::new(
            1,
            Arc::new(FailureCollector::new()),
            CancellationToken::new(),
        ));
        queue
            .enqueue(Job::new("slow", || async {
                tokio::time::sleep(std::time::Duration::from_millis(150)).await;
                Ok(())
            }))
            .unwrap();
        queue.close();

        let mut workers = WorkerPool::spawn(&SchedulerConfig::new(1), queue, pool.clone());
        let first = tokio::time::timeout(std::time::Duration::from_millis(20), workers.join()).await;
        assert!(first.is_err());
        assert_eq!(pool.states.get(0), Some(WorkerState::Busy));

        let errors = workers.join().await;
        assert!(errors.is_empty());
        assert_eq!(pool.states.get(0), Some(WorkerState::Stopped));
        assert_eq!(pool.counters.snapshot(0, 0, 1).completed, 1);
    }
}
