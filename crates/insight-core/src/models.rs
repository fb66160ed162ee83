//! Data models for extraction jobs, their outcomes, and queue health.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults::JOB_MAX_RETRIES;
use crate::error::Error;

/// Current UTC time truncated to the microsecond precision the store keeps.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// =============================================================================
// JOB STATUS
// =============================================================================

/// Lifecycle state of an extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Complete,
        JobStatus::Failed,
    ];

    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    /// Queued or processing: at most one such job per topic.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// States a job may be in immediately before entering `self`.
    ///
    /// `failed -> queued` is only taken by an explicit manual retry.
    pub fn predecessors(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Queued => &[JobStatus::Processing, JobStatus::Failed],
            JobStatus::Processing => &[JobStatus::Queued],
            JobStatus::Complete => &[JobStatus::Processing],
            JobStatus::Failed => &[JobStatus::Processing],
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.predecessors().contains(&self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Serialization(format!("unknown job status: {other}"))),
        }
    }
}

// =============================================================================
// STRUCTURED JOB ERROR
// =============================================================================

/// Failure class recorded with a job error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Likely to succeed if retried (timeouts, connection failures, 429/5xx).
    Transient,
    /// Unlikely to succeed on retry.
    Permanent,
    /// Stored error text predates the structured format.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn is_transient(self) -> bool {
        self == ErrorKind::Transient
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error persisted with a job and rendered directly to callers.
///
/// Stored as JSON text: `{"type":"transient","message":"...","retry_eligible":false}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    /// Whether the queue will retry the job automatically.
    pub retry_eligible: bool,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retry_eligible: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_eligible,
        }
    }

    /// Serialize to the stored JSON form.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the stored column, tolerating legacy plain-text errors.
    pub fn from_stored(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self {
            kind: ErrorKind::Unknown,
            message: raw.to_string(),
            retry_eligible: false,
        })
    }
}

// =============================================================================
// JOB
// =============================================================================

/// A persisted extraction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub topic: String,
    pub requester_id: String,
    pub priority: i32,
    pub status: JobStatus,
    pub insight_count: i64,
    pub error: Option<JobError>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub sources_processed: i64,
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// A failed job with retry budget left can be requeued by hand.
    pub fn can_retry_manually(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < JOB_MAX_RETRIES
    }
}

/// Counters returned by a successful extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub insight_count: i64,
    pub sources_processed: i64,
}

impl ExtractionOutput {
    pub fn new(insight_count: i64, sources_processed: i64) -> Self {
        Self {
            insight_count,
            sources_processed,
        }
    }
}

// =============================================================================
// PARTIAL UPDATES
// =============================================================================

/// Partial update applied by `JobRepository::update`.
///
/// Unset fields are left untouched; `updated_at` is always bumped.
/// `error: Some(None)` clears the stored error.
/// `only_from` narrows a status change to a single legal predecessor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub only_from: Option<JobStatus>,
    pub insight_count: Option<i64>,
    pub sources_processed: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub retry_count: Option<i32>,
    pub error: Option<Option<JobError>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn only_from(mut self, status: JobStatus) -> Self {
        self.only_from = Some(status);
        self
    }

    /// Statuses the row may currently hold for this update to apply.
    /// Empty when the update changes no status.
    pub fn allowed_predecessors(&self) -> Vec<JobStatus> {
        let Some(to) = self.status else {
            return Vec::new();
        };
        to.predecessors()
            .iter()
            .copied()
            .filter(|from| self.only_from.map_or(true, |only| only == *from))
            .collect()
    }

    pub fn insight_count(mut self, count: i64) -> Self {
        self.insight_count = Some(count);
        self
    }

    pub fn sources_processed(mut self, count: i64) -> Self {
        self.sources_processed = Some(count);
        self
    }

    pub fn duration_seconds(mut self, secs: f64) -> Self {
        self.duration_seconds = Some(secs);
        self
    }

    pub fn retry_count(mut self, count: i32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn error(mut self, error: JobError) -> Self {
        self.error = Some(Some(error));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn last_retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_retry_at = Some(at);
        self
    }

    pub fn estimated_completion_at(mut self, at: DateTime<Utc>) -> Self {
        self.estimated_completion_at = Some(at);
        self
    }

    /// Worker picked the job up.
    pub fn processing(estimated_completion_at: DateTime<Utc>) -> Self {
        Self::new()
            .status(JobStatus::Processing)
            .estimated_completion_at(estimated_completion_at)
    }

    /// Extraction finished successfully.
    pub fn complete(output: ExtractionOutput, duration_seconds: f64) -> Self {
        Self::new()
            .status(JobStatus::Complete)
            .insight_count(output.insight_count)
            .sources_processed(output.sources_processed)
            .duration_seconds(duration_seconds)
    }

    /// Back to the queue after a failed attempt. Applies to `processing` only.
    pub fn requeue(retry_count: i32, at: DateTime<Utc>) -> Self {
        Self::new()
            .status(JobStatus::Queued)
            .only_from(JobStatus::Processing)
            .retry_count(retry_count)
            .last_retry_at(at)
            .clear_error()
    }

    /// Requeue of a `failed` job on request.
    pub fn manual_retry(retry_count: i32, at: DateTime<Utc>) -> Self {
        Self::new()
            .status(JobStatus::Queued)
            .only_from(JobStatus::Failed)
            .retry_count(retry_count)
            .last_retry_at(at)
            .clear_error()
    }

    /// Orphaned `processing` job returned to the queue as-is.
    pub fn recovered() -> Self {
        Self::new()
            .status(JobStatus::Queued)
            .only_from(JobStatus::Processing)
    }

    /// Terminal failure.
    pub fn failed(error: JobError) -> Self {
        Self::new().status(JobStatus::Failed).error(error)
    }

    /// Mid-flight progress report.
    pub fn progress(sources_processed: i64) -> Self {
        Self::new().sources_processed(sources_processed)
    }
}

// =============================================================================
// PUBLIC API OUTCOMES
// =============================================================================

/// Receipt returned by `add_job`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: Uuid,
    pub topic: String,
    pub status: JobStatus,
    pub priority: i32,
}

/// Result of a manual retry request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// The failed job was requeued; `attempt` is its new retry count.
    Retrying { job_id: Uuid, attempt: i32 },
    /// The retry budget is exhausted.
    MaxRetries { retry_count: i32 },
    /// No failed job exists for the topic.
    NotFound,
}

/// Result of scheduling a batch refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub queued: Vec<JobTicket>,
    /// Topics that already had an active job.
    pub skipped: Vec<String>,
}

/// Result of a recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Orphaned `processing` jobs reset to `queued`.
    pub stale_requeued: usize,
    /// `queued` rows restored to the in-memory scheduler.
    pub pending_restored: usize,
}

// =============================================================================
// HEALTH
// =============================================================================

/// Live queue metrics (no database access).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub workers_active: usize,
    pub queue_size: usize,
    pub jobs_processing: usize,
}

/// Aggregate over completed jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionStats {
    /// Jobs completed since the requested cutoff.
    pub completed: i64,
    /// Mean over all completed jobs with a recorded duration.
    pub avg_duration_seconds: Option<f64>,
}

/// Number of stored jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: i64,
    pub processing: i64,
    pub complete: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.queued + self.processing + self.complete + self.failed
    }
}

/// A failed job as shown in a health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub job_id: Uuid,
    pub topic: String,
    pub retry_count: i32,
    pub error: Option<JobError>,
    pub failed_at: DateTime<Utc>,
}

impl From<Job> for FailureSummary {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            topic: job.topic,
            retry_count: job.retry_count,
            error: job.error,
            failed_at: job.updated_at,
        }
    }
}

/// Operational view combining live metrics and stored history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(flatten)]
    pub metrics: HealthMetrics,
    pub recent_failures: Vec<FailureSummary>,
    pub avg_duration_seconds: Option<f64>,
    pub completed_today: i64,
    pub status_counts: StatusCounts,
}
