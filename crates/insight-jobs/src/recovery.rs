//! Startup recovery of jobs orphaned by a crash or restart.

use std::time::Duration;

use tracing::{debug, info, warn};

use insight_core::{Error, JobRepository, JobStatus, JobUpdate, RecoveryReport, Result};

use crate::active::ActiveJobs;
use crate::scheduler::{PriorityScheduler, QueuedJob};

/// Requeue orphaned `processing` jobs and restore `queued` rows missing
/// from the scheduler.
///
/// Safe to run repeatedly. The reset only applies to rows still in
/// `processing`, so a job that finished or failed after the scan keeps its
/// outcome. Restored jobs are tracked in `active` so a second sweep skips
/// them.
pub async fn recover_stale_jobs(
    store: &dyn JobRepository,
    scheduler: &PriorityScheduler,
    active: &ActiveJobs,
    stale_after: Duration,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for job in store.find_stale(stale_after).await? {
        match store.update(job.id, JobUpdate::recovered()).await {
            Ok(()) => {}
            Err(Error::InvalidTransition { .. }) => {
                debug!(job_id = %job.id, "Stale job already moved on");
                continue;
            }
            Err(e) => return Err(e),
        }

        warn!(
            subsystem = "jobs",
            component = "recovery",
            job_id = %job.id,
            topic = %job.topic,
            last_update = %job.updated_at,
            "Recovered stale job"
        );
        active.insert(&job.topic, job.id);
        scheduler.enqueue(QueuedJob::new(
            job.id,
            job.topic,
            job.requester_id,
            job.priority,
        ));
        report.stale_requeued += 1;
    }

    for job in store.find_by_status(JobStatus::Queued).await? {
        if active.get(&job.topic) == Some(job.id) {
            continue;
        }
        active.insert(&job.topic, job.id);
        scheduler.enqueue(QueuedJob::new(
            job.id,
            job.topic,
            job.requester_id,
            job.priority,
        ));
        report.pending_restored += 1;
    }

    if report.stale_requeued > 0 || report.pending_restored > 0 {
        info!(
            subsystem = "jobs",
            component = "recovery",
            stale_requeued = report.stale_requeued,
            pending_restored = report.pending_restored,
            "Recovery complete"
        );
    }

    Ok(report)
}
