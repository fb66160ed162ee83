//! In-memory priority scheduler feeding ready jobs to workers.
//!
//! Entries are ordered by priority (higher first), then by submission
//! sequence (earlier first). The heap is transient: the job store stays
//! authoritative and recovery rebuilds the heap after a restart.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

/// A job waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub priority: i32,
    pub job_id: Uuid,
    pub topic: String,
    pub requester_id: String,
}

impl QueuedJob {
    pub fn new(
        job_id: Uuid,
        topic: impl Into<String>,
        requester_id: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            priority,
            job_id,
            topic: topic.into(),
            requester_id: requester_id.into(),
        }
    }
}

/// Outcome of a bounded dequeue wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    Job(QueuedJob),
    /// Nothing became ready before the timeout.
    Empty,
    /// The scheduler is shutting down; the worker should exit.
    Shutdown,
}

#[derive(Debug)]
enum Slot {
    Job(QueuedJob),
    Shutdown,
}

#[derive(Debug)]
struct Entry {
    priority: i32,
    seq: u64,
    slot: Slot,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap: larger priority wins, then smaller sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority heap shared by every worker.
#[derive(Debug, Default)]
pub struct PriorityScheduler {
    heap: Mutex<BinaryHeap<Entry>>,
    seq: AtomicU64,
    notify: Notify,
    shutdown: CancellationToken,
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn heap(&self) -> MutexGuard<'_, BinaryHeap<Entry>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, priority: i32, slot: Slot) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap().push(Entry {
            priority,
            seq,
            slot,
        });
    }

    /// Add a job to the heap and wake one waiting worker.
    pub fn enqueue(&self, job: QueuedJob) {
        trace!(
            subsystem = "jobs",
            component = "scheduler",
            op = "enqueue",
            job_id = %job.job_id,
            priority = job.priority,
            "Enqueued job"
        );
        self.push(job.priority, Slot::Job(job));
        self.notify.notify_one();
    }

    /// Wait up to `timeout` for the highest-priority entry.
    ///
    /// Returns immediately with [`Dequeued::Shutdown`] once
    /// [`shutdown`](Self::shutdown) has been called.
    pub async fn dequeue(&self, timeout: Duration) -> Dequeued {
        let deadline = Instant::now() + timeout;

        loop {
            if self.shutdown.is_cancelled() {
                return Dequeued::Shutdown;
            }

            // Register interest before checking the heap so an enqueue racing
            // with this check still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = self.heap().pop();
            match popped {
                Some(Entry {
                    slot: Slot::Job(job),
                    ..
                }) => return Dequeued::Job(job),
                Some(Entry {
                    slot: Slot::Shutdown,
                    ..
                }) => return Dequeued::Shutdown,
                None => {}
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => return Dequeued::Shutdown,
                _ = tokio::time::sleep_until(deadline) => return Dequeued::Empty,
            }
        }
    }

    /// Stop handing out jobs: cancel pending waits and push one sentinel per
    /// worker ahead of every job.
    pub fn shutdown(&self, workers: usize) {
        for _ in 0..workers {
            self.push(i32::MAX, Slot::Shutdown);
        }
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of jobs waiting (sentinels excluded).
    pub fn len(&self) -> usize {
        self.heap()
            .iter()
            .filter(|entry| matches!(entry.slot, Slot::Job(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.heap().clear();
    }
}
