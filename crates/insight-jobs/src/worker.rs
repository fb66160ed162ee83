//! Worker pool that runs extraction jobs off the priority scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinError;
use tracing::{debug, error, field, info, instrument, warn, Span};
use uuid::Uuid;

use insight_core::{defaults, logging};
use insight_core::{
    utc_now, Error, ExtractionOutput, Job, JobError, JobRepository, JobStatus, JobUpdate,
};

use crate::active::ActiveJobs;
use crate::classifier::{classify_error, decide, RetryDecision};
use crate::handler::{ExtractionError, Extractor, JobContext};
use crate::scheduler::{Dequeued, PriorityScheduler, QueuedJob};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Soft per-attempt timeout.
    pub job_timeout: Duration,
    /// Upper bound on a single dequeue wait.
    pub dequeue_timeout: Duration,
    /// How long `stop()` waits for each worker.
    pub shutdown_timeout: Duration,
    /// Age after which a `processing` job is considered orphaned.
    pub stale_after: Duration,
    /// Pause after a store error before the write or claim is tried again.
    pub store_retry_backoff: Duration,
    /// Priority for automatic retries.
    pub retry_priority: i32,
    /// Priority for manual retries.
    pub manual_retry_priority: i32,
    /// Priority for scheduled refreshes.
    pub refresh_priority: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: defaults::JOB_WORKERS,
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            dequeue_timeout: Duration::from_millis(defaults::JOB_DEQUEUE_TIMEOUT_MS),
            shutdown_timeout: Duration::from_secs(defaults::JOB_SHUTDOWN_TIMEOUT_SECS),
            stale_after: Duration::from_secs(defaults::JOB_STALE_AFTER_SECS),
            store_retry_backoff: Duration::from_millis(defaults::JOB_STORE_RETRY_BACKOFF_MS),
            retry_priority: defaults::PRIORITY_RETRY,
            manual_retry_priority: defaults::PRIORITY_MANUAL_RETRY,
            refresh_priority: defaults::PRIORITY_REFRESH,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `EXTRACTION_WORKERS` | `2` | Worker tasks |
    /// | `EXTRACTION_TIMEOUT_SECS` | `900` | Soft per-attempt timeout |
    /// | `EXTRACTION_STALE_AFTER_SECS` | `1200` | Orphaned-job threshold |
    /// | `EXTRACTION_DEQUEUE_TIMEOUT_MS` | `1000` | Max wait per dequeue |
    /// | `EXTRACTION_SHUTDOWN_TIMEOUT_SECS` | `5` | Per-worker join wait on stop |
    /// | `EXTRACTION_STORE_RETRY_BACKOFF_MS` | `500` | Pause after a store error |
    /// | `EXTRACTION_RETRY_PRIORITY` | `1` | Priority of automatic retries |
    pub fn from_env() -> Self {
        let base = Self::default();

        Self {
            workers: env_parse::<usize>("EXTRACTION_WORKERS")
                .unwrap_or(base.workers)
                .max(1),
            job_timeout: env_parse("EXTRACTION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.job_timeout),
            stale_after: env_parse("EXTRACTION_STALE_AFTER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.stale_after),
            dequeue_timeout: env_parse("EXTRACTION_DEQUEUE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.dequeue_timeout),
            shutdown_timeout: env_parse("EXTRACTION_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.shutdown_timeout),
            store_retry_backoff: env_parse("EXTRACTION_STORE_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.store_retry_backoff),
            retry_priority: env_parse("EXTRACTION_RETRY_PRIORITY")
                .unwrap_or(base.retry_priority),
            ..base
        }
    }

    /// Set the number of worker tasks (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after = threshold;
        self
    }

    pub fn with_store_retry_backoff(mut self, backoff: Duration) -> Self {
        self.store_retry_backoff = backoff;
        self
    }

    pub fn with_retry_priority(mut self, priority: i32) -> Self {
        self.retry_priority = priority;
        self
    }
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A worker task started.
    WorkerStarted { worker: usize },
    /// A job moved to `processing`.
    JobStarted { job_id: Uuid, topic: String },
    /// Progress was reported for a job.
    JobProgress { job_id: Uuid, sources_processed: i64 },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        topic: String,
        insight_count: i64,
        duration_ms: u64,
    },
    /// A transient failure was requeued.
    JobRetrying {
        job_id: Uuid,
        topic: String,
        attempt: i32,
        error: String,
    },
    /// A job failed for good.
    JobFailed {
        job_id: Uuid,
        topic: String,
        error: JobError,
    },
    /// A worker task exited.
    WorkerStopped { worker: usize },
}

/// State shared by every worker task and the public queue handle.
pub(crate) struct WorkerShared {
    pub store: Arc<dyn JobRepository>,
    pub extractor: Arc<dyn Extractor>,
    pub scheduler: Arc<PriorityScheduler>,
    pub active: Arc<ActiveJobs>,
    pub config: WorkerConfig,
    pub event_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerShared {
    pub fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

/// Main loop of one worker task.
#[instrument(skip(shared), fields(subsystem = "jobs", component = "worker"))]
pub(crate) async fn run(worker: usize, shared: Arc<WorkerShared>) {
    info!("Extraction worker started");
    shared.emit(WorkerEvent::WorkerStarted { worker });

    loop {
        match shared.scheduler.dequeue(shared.config.dequeue_timeout).await {
            Dequeued::Job(queued) => process(&shared, queued).await,
            Dequeued::Empty => continue,
            Dequeued::Shutdown => break,
        }
    }

    shared.emit(WorkerEvent::WorkerStopped { worker });
    info!("Extraction worker stopped");
}

/// Run one dequeued job to an outcome. Never panics; storage errors only
/// degrade this job.
#[instrument(
    skip(shared, queued),
    fields(
        job_id = %queued.job_id,
        topic = %queued.topic,
        priority = queued.priority,
        retry_count = field::Empty,
        error_kind = field::Empty,
    )
)]
async fn process(shared: &WorkerShared, queued: QueuedJob) {
    let job = match shared.store.get(queued.job_id).await {
        Ok(Some(job)) if job.status == JobStatus::Queued => job,
        Ok(Some(job)) => {
            debug!(status = %job.status, "Skipping job that is no longer queued");
            if !job.is_active() {
                shared.active.release(&job.topic, job.id);
            }
            return;
        }
        Ok(None) => {
            warn!("Skipping job missing from store");
            shared.active.release(&queued.topic, queued.job_id);
            return;
        }
        Err(e) => {
            error!(error = %e, "Failed to load job, requeueing");
            requeue_later(shared, queued);
            return;
        }
    };

    let job_timeout = shared.config.job_timeout;
    let eta = utc_now()
        + chrono::Duration::from_std(job_timeout).unwrap_or_else(|_| chrono::Duration::zero());
    match shared.store.update(job.id, JobUpdate::processing(eta)).await {
        Ok(()) => {}
        Err(Error::InvalidTransition { .. }) => {
            debug!("Job claimed by another worker");
            return;
        }
        Err(e) => {
            error!(error = %e, "Failed to mark job processing, requeueing");
            requeue_later(shared, queued);
            return;
        }
    }

    Span::current().record(logging::RETRY_COUNT, job.retry_count);
    info!("Processing extraction job");
    shared.emit(WorkerEvent::JobStarted {
        job_id: job.id,
        topic: job.topic.clone(),
    });

    let start = Instant::now();
    let outcome = execute(shared, &job).await;
    let elapsed = start.elapsed();

    match outcome {
        Ok(output) => complete(shared, &job, output, elapsed).await,
        Err(err) => handle_failure(shared, &job, err).await,
    }
}

/// Invoke the extractor on the blocking pool under the soft timeout.
async fn execute(shared: &WorkerShared, job: &Job) -> Result<ExtractionOutput, ExtractionError> {
    let job_timeout = shared.config.job_timeout;
    let timed_out = Arc::new(AtomicBool::new(false));
    let timer = {
        let timed_out = timed_out.clone();
        tokio::spawn(async move {
            tokio::time::sleep(job_timeout).await;
            timed_out.store(true, Ordering::SeqCst);
        })
    };

    // Progress writes are drained in order by a companion task so the
    // extractor never waits on the store.
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<i64>();
    let progress_writer = {
        let store = shared.store.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            while let Some(n) = progress_rx.recv().await {
                if let Err(e) = store.update(job_id, JobUpdate::progress(n)).await {
                    warn!(%job_id, error = %e, "Failed to record progress");
                }
            }
        })
    };

    let event_tx = shared.event_tx.clone();
    let job_id = job.id;
    let ctx = JobContext::new(job).with_progress_callback(move |sources_processed| {
        let _ = progress_tx.send(sources_processed);
        let _ = event_tx.send(WorkerEvent::JobProgress {
            job_id,
            sources_processed,
        });
    });

    let extractor = shared.extractor.clone();
    let result = tokio::task::spawn_blocking(move || extractor.extract(&ctx)).await;

    timer.abort();
    // The context (and its sender) is gone once the blocking task ends.
    if let Err(e) = progress_writer.await {
        warn!(%job_id, error = %e, "Progress writer task failed");
    }

    if timed_out.load(Ordering::SeqCst) {
        return Err(ExtractionError::Timeout {
            secs: job_timeout.as_secs(),
        });
    }

    result.unwrap_or_else(|e| Err(ExtractionError::Panicked(panic_message(e))))
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "extraction task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Put a dequeued job back on the scheduler after a store error. Its row
/// is still `queued` and its cache entry is kept.
fn requeue_later(shared: &WorkerShared, queued: QueuedJob) {
    let scheduler = shared.scheduler.clone();
    let backoff = shared.config.store_retry_backoff;
    let retry = QueuedJob {
        priority: shared.config.retry_priority,
        ..queued
    };
    tokio::spawn(async move {
        tokio::time::sleep(backoff).await;
        if !scheduler.is_shutdown() {
            scheduler.enqueue(retry);
        }
    });
}

/// Apply an outcome write, trying once more after the backoff.
async fn write_outcome(
    shared: &WorkerShared,
    job_id: Uuid,
    update: JobUpdate,
) -> Result<(), Error> {
    match shared.store.update(job_id, update.clone()).await {
        Err(e)
            if !matches!(
                e,
                Error::InvalidTransition { .. } | Error::NotFound(_) | Error::DuplicateJob { .. }
            ) =>
        {
            warn!(error = %e, "Store write failed, trying again");
            tokio::time::sleep(shared.config.store_retry_backoff).await;
            shared.store.update(job_id, update).await
        }
        result => result,
    }
}

async fn complete(shared: &WorkerShared, job: &Job, output: ExtractionOutput, elapsed: Duration) {
    let update = JobUpdate::complete(output, elapsed.as_secs_f64());
    let result = write_outcome(shared, job.id, update).await;
    shared.active.release(&job.topic, job.id);

    if let Err(e) = result {
        error!(error = %e, "Failed to mark job complete");
        return;
    }

    let duration_ms = elapsed.as_millis() as u64;
    info!(
        insight_count = output.insight_count,
        sources_processed = output.sources_processed,
        duration_ms,
        "Extraction job completed"
    );
    shared.emit(WorkerEvent::JobCompleted {
        job_id: job.id,
        topic: job.topic.clone(),
        insight_count: output.insight_count,
        duration_ms,
    });
}

async fn handle_failure(shared: &WorkerShared, job: &Job, err: ExtractionError) {
    let kind = classify_error(&err);
    let message = err.to_string();
    Span::current().record(logging::ERROR_KIND, kind.as_str());

    match decide(kind, job.retry_count, defaults::JOB_MAX_RETRIES) {
        RetryDecision::Retry { attempt } => {
            let update = JobUpdate::requeue(attempt, utc_now());
            if let Err(e) = write_outcome(shared, job.id, update).await {
                // Fall back to a failure that `retry()` can pick up.
                error!(error = %e, "Failed to requeue job, marking failed");
                fail(shared, job, JobError::new(kind, message, false)).await;
                return;
            }

            shared.scheduler.enqueue(QueuedJob::new(
                job.id,
                job.topic.as_str(),
                job.requester_id.as_str(),
                shared.config.retry_priority,
            ));
            warn!(attempt, error = %message, "Extraction failed, retrying");
            shared.emit(WorkerEvent::JobRetrying {
                job_id: job.id,
                topic: job.topic.clone(),
                attempt,
                error: message,
            });
        }
        RetryDecision::Fail => fail(shared, job, JobError::new(kind, message, false)).await,
    }
}

async fn fail(shared: &WorkerShared, job: &Job, error: JobError) {
    let result = write_outcome(shared, job.id, JobUpdate::failed(error.clone())).await;
    shared.active.release(&job.topic, job.id);

    if let Err(e) = result {
        error!(error = %e, "Failed to mark job failed");
        return;
    }

    warn!(error = %error.message, "Extraction job failed");
    shared.emit(WorkerEvent::JobFailed {
        job_id: job.id,
        topic: job.topic.clone(),
        error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.job_timeout, Duration::from_secs(900));
        assert_eq!(config.stale_after, Duration::from_secs(1200));
        assert_eq!(config.dequeue_timeout, Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_priority, 1);
        assert_eq!(config.manual_retry_priority, 10);
        assert_eq!(config.refresh_priority, 10);
        assert_eq!(config.store_retry_backoff, Duration::from_millis(500));
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_workers(4)
            .with_job_timeout(Duration::from_millis(250))
            .with_dequeue_timeout(Duration::from_millis(20))
            .with_shutdown_timeout(Duration::from_secs(1))
            .with_stale_after(Duration::from_secs(60))
            .with_store_retry_backoff(Duration::from_millis(10))
            .with_retry_priority(3);

        assert_eq!(config.workers, 4);
        assert_eq!(config.job_timeout, Duration::from_millis(250));
        assert_eq!(config.dequeue_timeout, Duration::from_millis(20));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.stale_after, Duration::from_secs(60));
        assert_eq!(config.store_retry_backoff, Duration::from_millis(10));
        assert_eq!(config.retry_priority, 3);
    }

    #[test]
    fn test_worker_config_at_least_one_worker() {
        assert_eq!(WorkerConfig::default().with_workers(0).workers, 1);
    }

    #[test]
    fn test_worker_config_from_env_unset_matches_default() {
        // Only meaningful when the variables are not exported by the shell.
        if std::env::vars().any(|(k, _)| k.starts_with("EXTRACTION_")) {
            return;
        }
        let from_env = WorkerConfig::from_env();
        let default = WorkerConfig::default();
        assert_eq!(from_env.workers, default.workers);
        assert_eq!(from_env.job_timeout, default.job_timeout);
        assert_eq!(from_env.retry_priority, default.retry_priority);
    }

    #[tokio::test]
    async fn test_panic_message_extracts_payload() {
        let err = tokio::task::spawn_blocking::<_, ()>(|| panic!("boom {}", 7))
            .await
            .unwrap_err();
        assert_eq!(panic_message(err), "boom 7");

        let err = tokio::task::spawn_blocking::<_, ()>(|| std::panic::panic_any("static"))
            .await
            .unwrap_err();
        assert_eq!(panic_message(err), "static");
    }
}
