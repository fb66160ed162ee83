//! Job repository implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use insight_core::{
    utc_now, CompletionStats, Error, Job, JobError, JobRepository, JobStatus, JobUpdate, Result,
    StatusCounts,
};

use crate::timestamp;

/// Column list shared by every query that materializes a `Job`.
const JOB_COLUMNS: &str = "id, topic, requester_id, priority, status, insight_count, error, \
     retry_count, last_retry_at, estimated_completion_at, sources_processed, duration_seconds, \
     created_at, updated_at";

/// SQLite implementation of JobRepository.
#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    /// Create a new SqliteJobRepository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: &SqliteRow) -> Result<Job> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let error: Option<String> = row.try_get("error")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Job {
            id: Uuid::parse_str(&id)
                .map_err(|e| Error::Serialization(format!("invalid job id {id:?}: {e}")))?,
            topic: row.try_get("topic")?,
            requester_id: row.try_get("requester_id")?,
            priority: row.try_get("priority")?,
            status: status.parse()?,
            insight_count: row.try_get("insight_count")?,
            error: error.as_deref().map(JobError::from_stored),
            retry_count: row.try_get("retry_count")?,
            last_retry_at: timestamp::decode_opt(row.try_get("last_retry_at")?)?,
            estimated_completion_at: timestamp::decode_opt(
                row.try_get("estimated_completion_at")?,
            )?,
            sources_processed: row.try_get("sources_processed")?,
            duration_seconds: row.try_get("duration_seconds")?,
            created_at: timestamp::decode(&created_at)?,
            updated_at: timestamp::decode(&updated_at)?,
        })
    }

    fn parse_job_rows(rows: Vec<SqliteRow>) -> Result<Vec<Job>> {
        rows.iter().map(Self::parse_job_row).collect()
    }

    /// Status of the active job for `topic`, if any.
    async fn active_status(&self, topic: &str) -> Result<Option<JobStatus>> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM extraction_jobs
             WHERE topic = ? AND status IN ('queued', 'processing')
             LIMIT 1",
        )
        .bind(topic)
        .fetch_optional(&self.pool)
        .await?;

        status.map(|s| s.parse()).transpose()
    }

    /// Translate a unique-index violation on the active-topic index.
    async fn duplicate_error(&self, topic: &str) -> Error {
        let status = self
            .active_status(topic)
            .await
            .ok()
            .flatten()
            .unwrap_or(JobStatus::Queued);
        Error::DuplicateJob {
            topic: topic.to_string(),
            status,
        }
    }

    async fn fetch_one_by(&self, sql: &str, bind: &str) -> Result<Option<Job>> {
        let row = sqlx::query(sql).bind(bind).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::parse_job_row).transpose()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn add(&self, topic: &str, requester_id: &str, priority: i32) -> Result<Uuid> {
        let job_id = Uuid::now_v7();
        let now = timestamp::encode(utc_now());

        // Single-statement check-and-insert; the partial unique index catches
        // anything that races past the NOT EXISTS guard.
        let result = sqlx::query(
            "INSERT INTO extraction_jobs
                 (id, topic, requester_id, priority, status, retry_count, created_at, updated_at)
             SELECT ?, ?, ?, ?, 'queued', 0, ?, ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM extraction_jobs
                 WHERE topic = ? AND status IN ('queued', 'processing')
             )",
        )
        .bind(job_id.to_string())
        .bind(topic)
        .bind(requester_id)
        .bind(priority)
        .bind(&now)
        .bind(&now)
        .bind(topic)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                debug!(
                    subsystem = "db",
                    component = "jobs",
                    op = "add",
                    %job_id,
                    topic,
                    priority,
                    "Inserted extraction job"
                );
                Ok(job_id)
            }
            Ok(_) => Err(self.duplicate_error(topic).await),
            Err(e) if is_unique_violation(&e) => Err(self.duplicate_error(topic).await),
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM extraction_jobs WHERE id = ?");
        self.fetch_one_by(&sql, &job_id.to_string()).await
    }

    async fn get_by_topic(&self, topic: &str) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM extraction_jobs
             WHERE topic = ?
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        );
        self.fetch_one_by(&sql, topic).await
    }

    async fn latest_failed(&self, topic: &str) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM extraction_jobs
             WHERE topic = ? AND status = 'failed'
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        );
        self.fetch_one_by(&sql, topic).await
    }

    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Result<()> {
        let allowed = update.allowed_predecessors();
        match update.status {
            Some(to) if allowed.is_empty() => return Err(Error::InvalidTransition { job_id, to }),
            _ => {}
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE extraction_jobs SET updated_at = ");
        qb.push_bind(timestamp::encode(utc_now()));

        if let Some(status) = update.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(count) = update.insight_count {
            qb.push(", insight_count = ").push_bind(count);
        }
        if let Some(count) = update.sources_processed {
            qb.push(", sources_processed = ").push_bind(count);
        }
        if let Some(secs) = update.duration_seconds {
            qb.push(", duration_seconds = ").push_bind(secs);
        }
        if let Some(count) = update.retry_count {
            qb.push(", retry_count = ").push_bind(count);
        }
        if let Some(error) = &update.error {
            let encoded = error.as_ref().map(JobError::to_json).transpose()?;
            qb.push(", error = ").push_bind(encoded);
        }
        if let Some(at) = update.last_retry_at {
            qb.push(", last_retry_at = ").push_bind(timestamp::encode(at));
        }
        if let Some(at) = update.estimated_completion_at {
            qb.push(", estimated_completion_at = ")
                .push_bind(timestamp::encode(at));
        }

        qb.push(" WHERE id = ").push_bind(job_id.to_string());

        if !allowed.is_empty() {
            qb.push(" AND status IN (");
            let mut guard = qb.separated(", ");
            for from in &allowed {
                guard.push_bind(from.as_str());
            }
            guard.push_unseparated(")");
        }

        let result = qb.build().execute(&self.pool).await;

        let done = match result {
            Ok(done) => done,
            Err(e) if is_unique_violation(&e) => {
                let topic = self
                    .get(job_id)
                    .await?
                    .map(|job| job.topic)
                    .unwrap_or_default();
                return Err(self.duplicate_error(&topic).await);
            }
            Err(e) => return Err(Error::Database(e)),
        };

        if done.rows_affected() == 0 {
            return match (self.get(job_id).await?, update.status) {
                (None, _) => Err(Error::NotFound(format!("job {job_id}"))),
                (Some(_), Some(to)) => Err(Error::InvalidTransition { job_id, to }),
                (Some(_), None) => Err(Error::Internal(format!(
                    "update of job {job_id} affected no rows"
                ))),
            };
        }

        Ok(())
    }

    async fn find_stale(&self, threshold: Duration) -> Result<Vec<Job>> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| Error::Config(format!("stale threshold out of range: {e}")))?;
        let cutoff = timestamp::encode(utc_now() - threshold);

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM extraction_jobs
             WHERE status = 'processing' AND updated_at < ?
             ORDER BY updated_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        Self::parse_job_rows(rows)
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM extraction_jobs
             WHERE status = ?
             ORDER BY priority DESC, created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        Self::parse_job_rows(rows)
    }

    async fn recent_failures(&self, limit: i64) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM extraction_jobs
             WHERE status = 'failed'
             ORDER BY updated_at DESC, id DESC
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Self::parse_job_rows(rows)
    }

    async fn completion_stats(&self, since: DateTime<Utc>) -> Result<CompletionStats> {
        let (completed, avg_duration_seconds): (i64, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(CASE WHEN updated_at >= ? THEN 1 END), AVG(duration_seconds)
             FROM extraction_jobs
             WHERE status = 'complete'",
        )
        .bind(timestamp::encode(since))
        .fetch_one(&self.pool)
        .await?;

        Ok(CompletionStats {
            completed,
            avg_duration_seconds,
        })
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM extraction_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status.parse::<JobStatus>()? {
                JobStatus::Queued => counts.queued = count,
                JobStatus::Processing => counts.processing = count,
                JobStatus::Complete => counts.complete = count,
                JobStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}
