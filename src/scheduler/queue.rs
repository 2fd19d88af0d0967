use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::scheduler::job::Job;

/// Why a job could not be enqueued. The job is handed back to the caller.
#[derive(Debug)]
pub enum EnqueueError {
    Full(Job),
    Closed(Job),
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
}

/// Thread-safe FIFO of pending jobs.
///
/// `enqueue` never waits. Consumers either poll with [`JobQueue::dequeue`] or
/// suspend in [`JobQueue::recv`] until a job arrives or the queue is closed
/// and empty.
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: Option<usize>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Creates an unbounded queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // No code path panics while holding the lock, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a job to the tail of the queue.
    pub fn enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(EnqueueError::Closed(job));
            }
            if self.capacity.is_some_and(|cap| state.jobs.len() >= cap) {
                return Err(EnqueueError::Full(job));
            }
            state.jobs.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Removes and returns the head job, or `None` if nothing is pending.
    pub fn dequeue(&self) -> Option<Job> {
        self.lock().jobs.pop_front()
    }

    /// Waits for the head job.
    ///
    /// Returns `None` only once the queue has been closed and every job
    /// already in it has been handed out.
    pub async fn recv(&self) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a concurrent enqueue or close is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(job) = state.jobs.pop_front() {
                    return Some(job);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops accepting new jobs. Pending jobs stay available to `recv`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Removes every pending job, oldest first.
    pub fn drain(&self) -> Vec<Job> {
        self.lock().jobs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|cap| self.len() >= cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn noop(id: u64) -> Job {
        Job::new(id, || async { Ok(()) })
    }

    fn ids(jobs: &[Job]) -> Vec<String> {
        jobs.iter().map(|j| j.id().to_string()).collect()
    }

    #[test]
    fn dequeue_is_fifo() {
        let queue = JobQueue::new();
        for i in 1..=3 {
            queue.enqueue(noop(i)).unwrap();
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue().unwrap().id().as_str(), "1");
        assert_eq!(queue.dequeue().unwrap().id().as_str(), "2");
        assert_eq!(queue.dequeue().unwrap().id().as_str(), "3");
        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn bounded_queue_rejects_when_full() {
        let queue = JobQueue::with_capacity(2);
        queue.enqueue(noop(1)).unwrap();
        queue.enqueue(noop(2)).unwrap();
        assert!(queue.is_full());

        match queue.enqueue(noop(3)) {
            Err(EnqueueError::Full(job)) => assert_eq!(job.id().as_str(), "3"),
            other => panic!("expected Full, got {:?}", other),
        }

        queue.dequeue();
        assert!(!queue.is_full());
        assert!(queue.enqueue(noop(4)).is_ok());
    }

    #[test]
    fn closed_queue_rejects_but_keeps_pending() {
        let queue = JobQueue::new();
        queue.enqueue(noop(1)).unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert!(matches!(queue.enqueue(noop(2)), Err(EnqueueError::Closed(_))));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_empties_in_order() {
        let queue = JobQueue::new();
        for i in 1..=4 {
            queue.enqueue(noop(i)).unwrap();
        }

        let drained = queue.drain();
        assert_eq!(ids(&drained), vec!["1", "2", "3", "4"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn recv_waits_for_enqueue() {
        let queue = Arc::new(JobQueue::new());
        let producer = queue.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.enqueue(noop(9)).unwrap();
        });

        let job = tokio::time::timeout(Duration::from_secs(2), queue.recv())
            .await
            .expect("recv should wake on enqueue")
            .expect("queue is open");
        assert_eq!(job.id().as_str(), "9");
    }

    #[tokio::test]
    async fn recv_returns_pending_then_none_after_close() {
        let queue = JobQueue::new();
        queue.enqueue(noop(1)).unwrap();
        queue.close();

        assert_eq!(queue.recv().await.unwrap().id().as_str(), "1");
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_waiting_receiver() {
        let queue = Arc::new(JobQueue::new());
        let waiter = queue.clone();
        let handle = tokio::spawn(async move { waiter.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("close should wake the receiver")
            .unwrap();
        assert!(result.is_none());
    }
}
