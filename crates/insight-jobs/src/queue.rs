//! Public entry point: `ExtractionQueue`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use insight_core::defaults::{self, SYSTEM_REQUESTER};
use insight_core::{
    utc_now, Error, ExtractionOutput, HealthMetrics, HealthReport, Job, JobRepository, JobStatus,
    JobTicket, JobUpdate, RecoveryReport, RefreshSummary, Result, RetryOutcome,
};

use crate::active::ActiveJobs;
use crate::handler::{ExtractionError, Extractor, JobContext};
use crate::scheduler::{PriorityScheduler, QueuedJob};
use crate::worker::{self, WorkerConfig, WorkerEvent, WorkerShared};
use crate::{health, recovery};

/// Durable background extraction queue.
///
/// Owns the worker pool, the in-memory scheduler and the active-topic
/// cache. The injected [`JobRepository`] is the source of truth.
pub struct ExtractionQueue {
    shared: Arc<WorkerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ExtractionQueue {
    /// Start building a queue over `store`.
    pub fn builder<R: JobRepository + 'static>(store: R) -> QueueBuilder {
        QueueBuilder::new(store)
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    /// Recover orphaned work, then spawn the worker pool.
    ///
    /// Must be called from within a tokio runtime. A queue starts once.
    pub async fn start(&self) -> Result<RecoveryReport> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Job("extraction queue has been stopped".into()));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Job("extraction queue already started".into()));
        }

        let report = self.recover_stale_jobs().await?;

        let handles: Vec<JoinHandle<()>> = (0..self.shared.config.workers)
            .map(|id| tokio::spawn(worker::run(id, self.shared.clone())))
            .collect();
        *self.workers.lock().unwrap_or_else(PoisonError::into_inner) = handles;

        info!(
            subsystem = "jobs",
            component = "queue",
            workers = self.shared.config.workers,
            job_timeout_secs = self.shared.config.job_timeout.as_secs(),
            stale_requeued = report.stale_requeued,
            pending_restored = report.pending_restored,
            "Extraction queue started"
        );
        Ok(report)
    }

    /// Submit a job for `topic`.
    ///
    /// Fails with [`Error::DuplicateJob`] while the topic has a queued or
    /// processing job.
    pub async fn add_job(&self, topic: &str, requester_id: &str, priority: i32) -> Result<JobTicket> {
        let shared = &self.shared;

        if let Some(cached) = shared.active.get(topic) {
            match shared.store.get(cached).await? {
                Some(job) if job.is_active() => {
                    return Err(Error::DuplicateJob {
                        topic: topic.to_string(),
                        status: job.status,
                    });
                }
                _ => {
                    debug!(topic, job_id = %cached, "Evicting stale active-cache entry");
                    shared.active.release(topic, cached);
                }
            }
        }

        let job_id = shared.store.add(topic, requester_id, priority).await?;
        shared.active.insert(topic, job_id);
        shared
            .scheduler
            .enqueue(QueuedJob::new(job_id, topic, requester_id, priority));

        info!(
            subsystem = "jobs",
            component = "queue",
            op = "add",
            %job_id,
            topic,
            requester_id,
            priority,
            queue_size = shared.scheduler.len(),
            "Queued extraction job"
        );

        Ok(JobTicket {
            job_id,
            topic: topic.to_string(),
            status: JobStatus::Queued,
            priority,
        })
    }

    /// Latest job for `topic`.
    pub async fn get_status(&self, topic: &str) -> Result<Option<Job>> {
        self.shared.store.get_by_topic(topic).await
    }

    /// Record mid-flight progress for a job.
    pub async fn update_progress(&self, job_id: Uuid, sources_processed: i64) -> Result<()> {
        self.shared
            .store
            .update(job_id, JobUpdate::progress(sources_processed))
            .await?;
        self.shared.emit(WorkerEvent::JobProgress {
            job_id,
            sources_processed,
        });
        Ok(())
    }

    /// Requeue the latest failed job for `topic` at manual-retry priority.
    pub async fn retry(&self, topic: &str) -> Result<RetryOutcome> {
        let shared = &self.shared;

        let Some(job) = shared.store.latest_failed(topic).await? else {
            return Ok(RetryOutcome::NotFound);
        };

        if !job.can_retry_manually() {
            info!(
                job_id = %job.id,
                topic,
                retry_count = job.retry_count,
                "Manual retry refused, retries exhausted"
            );
            return Ok(RetryOutcome::MaxRetries {
                retry_count: job.retry_count,
            });
        }

        let attempt = job.retry_count + 1;
        shared
            .store
            .update(job.id, JobUpdate::manual_retry(attempt, utc_now()))
            .await?;

        let priority = shared.config.manual_retry_priority;
        shared.active.insert(&job.topic, job.id);
        shared.scheduler.enqueue(QueuedJob::new(
            job.id,
            job.topic.as_str(),
            job.requester_id.as_str(),
            priority,
        ));

        info!(
            subsystem = "jobs",
            component = "queue",
            op = "retry",
            job_id = %job.id,
            topic,
            retry_count = attempt,
            priority,
            "Manual retry queued"
        );

        Ok(RetryOutcome::Retrying {
            job_id: job.id,
            attempt,
        })
    }

    /// Live metrics; no store access. `workers_active` is the configured
    /// pool size.
    pub fn health_metrics(&self) -> HealthMetrics {
        HealthMetrics {
            workers_active: self.shared.config.workers,
            queue_size: self.shared.scheduler.len(),
            jobs_processing: self.shared.active.len(),
        }
    }

    /// Metrics plus stored history (recent failures, today's throughput).
    pub async fn health_report(&self) -> Result<HealthReport> {
        health::health_report(self.shared.store.as_ref(), self.health_metrics()).await
    }

    /// Schedule a refresh of `topics` on behalf of the system.
    ///
    /// Topics that already have an active job are skipped, not failed.
    pub async fn enqueue_refresh<I, S>(&self, topics: I) -> Result<RefreshSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let priority = self.shared.config.refresh_priority;
        let mut summary = RefreshSummary::default();

        for topic in topics {
            let topic = topic.as_ref();
            match self.add_job(topic, SYSTEM_REQUESTER, priority).await {
                Ok(ticket) => summary.queued.push(ticket),
                Err(e) if e.is_duplicate() => summary.skipped.push(topic.to_string()),
                Err(e) => return Err(e),
            }
        }

        info!(
            subsystem = "jobs",
            component = "queue",
            op = "refresh",
            queued = summary.queued.len(),
            skipped = summary.skipped.len(),
            "Scheduled topic refresh"
        );
        Ok(summary)
    }

    /// Requeue orphaned jobs; see [`recovery::recover_stale_jobs`].
    pub async fn recover_stale_jobs(&self) -> Result<RecoveryReport> {
        let shared = &self.shared;
        recovery::recover_stale_jobs(
            shared.store.as_ref(),
            &shared.scheduler,
            &shared.active,
            shared.config.stale_after,
        )
        .await
    }

    /// Subscribe to worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Stop the worker pool.
    ///
    /// Workers finish their current job; each is given
    /// `shutdown_timeout` to exit. Jobs still waiting stay `queued` in the
    /// store and are restored by the next [`start`](Self::start).
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        info!(
            subsystem = "jobs",
            component = "queue",
            workers = handles.len(),
            "Stopping extraction queue"
        );
        self.shared.scheduler.shutdown(handles.len());

        let timeout = self.shared.config.shutdown_timeout;
        for (worker, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(worker, error = %e, "Worker task failed"),
                Err(_) => warn!(
                    worker,
                    timeout_secs = timeout.as_secs(),
                    "Worker did not stop in time"
                ),
            }
        }

        self.shared.scheduler.clear();
        self.shared.active.clear();
        info!(subsystem = "jobs", component = "queue", "Extraction queue stopped");
    }
}

impl Drop for ExtractionQueue {
    fn drop(&mut self) {
        // Let detached workers exit if the queue is dropped without stop().
        self.shared.scheduler.shutdown(0);
    }
}

/// Builder for creating an [`ExtractionQueue`].
pub struct QueueBuilder {
    store: Arc<dyn JobRepository>,
    extractor: Option<Arc<dyn Extractor>>,
    config: WorkerConfig,
}

impl QueueBuilder {
    pub fn new<R: JobRepository + 'static>(store: R) -> Self {
        Self {
            store: Arc::new(store),
            extractor: None,
            config: WorkerConfig::default(),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the extraction callable.
    pub fn with_extractor<E: Extractor + 'static>(mut self, extractor: E) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    /// Set the extraction callable from a closure.
    pub fn with_extractor_fn<F>(self, f: F) -> Self
    where
        F: Fn(&JobContext) -> std::result::Result<ExtractionOutput, ExtractionError>
            + Send
            + Sync
            + 'static,
    {
        self.with_extractor(f)
    }

    /// Build the queue. Workers are not spawned until `start`.
    pub fn build(self) -> Result<ExtractionQueue> {
        let extractor = self
            .extractor
            .ok_or_else(|| Error::Config("an extractor is required".into()))?;
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);

        let shared = WorkerShared {
            store: self.store,
            extractor,
            scheduler: Arc::new(PriorityScheduler::new()),
            active: Arc::new(ActiveJobs::new()),
            config: self.config,
            event_tx,
        };

        Ok(ExtractionQueue {
            shared: Arc::new(shared),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }
}
