//! Storage abstractions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CompletionStats, Job, JobStatus, JobUpdate, StatusCounts};

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Durable store for extraction jobs.
///
/// Implementations enforce "at most one active job per topic" themselves;
/// callers may cache active topics but the store is authoritative.
/// Every method runs as its own short transaction.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new `queued` job.
    ///
    /// Fails with `Error::DuplicateJob` when the topic already has a queued
    /// or processing job.
    async fn add(&self, topic: &str, requester_id: &str, priority: i32) -> Result<Uuid>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Latest job for a topic (by creation time).
    async fn get_by_topic(&self, topic: &str) -> Result<Option<Job>>;

    /// Most recent failed job for a topic.
    async fn latest_failed(&self, topic: &str) -> Result<Option<Job>>;

    /// Apply a partial update; always bumps `updated_at`.
    ///
    /// When `update.status` is set the row must currently be in one of
    /// `update.allowed_predecessors()`, otherwise `Error::InvalidTransition`.
    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Result<()>;

    /// `processing` jobs whose `updated_at` is older than `threshold`.
    async fn find_stale(&self, threshold: Duration) -> Result<Vec<Job>>;

    /// Jobs in the given status, highest priority first, oldest first.
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    /// Latest failed jobs, newest first.
    async fn recent_failures(&self, limit: i64) -> Result<Vec<Job>>;

    /// Completed-job aggregate: count of jobs finished at or after `since`,
    /// average duration over every completed job.
    async fn completion_stats(&self, since: DateTime<Utc>) -> Result<CompletionStats>;

    /// Number of jobs per status.
    async fn status_counts(&self) -> Result<StatusCounts>;
}
