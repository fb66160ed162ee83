//! Test fixtures for database integration tests.
//!
//! Each [`TestDatabase`] is a migrated SQLite file inside its own temporary
//! directory, removed when the fixture is dropped.
//!
//! ```rust,ignore
//! use insight_db::test_fixtures::TestDatabase;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let test_db = TestDatabase::new().await;
//!     let id = test_db.db.jobs.add("topic", "user", 5).await.unwrap();
//! }
//! ```

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use insight_core::JobStatus;

use crate::{timestamp, Database};

/// Migrated database in a temporary directory.
pub struct TestDatabase {
    pub db: Database,
    _dir: TempDir,
}

impl TestDatabase {
    /// Create and migrate a fresh database.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let url = format!("sqlite://{}", dir.path().join("insights.db").display());
        let db = Database::connect(&url)
            .await
            .expect("Failed to open test database");
        db.migrate().await.expect("Failed to run migrations");
        Self { db, _dir: dir }
    }

    /// Force a job into `status` with a chosen `updated_at`, bypassing the
    /// transition guard. Simulates a crash mid-processing.
    pub async fn force_state(&self, job_id: Uuid, status: JobStatus, updated_at: DateTime<Utc>) {
        sqlx::query("UPDATE extraction_jobs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(timestamp::encode(updated_at))
            .bind(job_id.to_string())
            .execute(&self.db.pool)
            .await
            .expect("Failed to force job state");
    }

    /// Raw `error` column for a job.
    pub async fn raw_error(&self, job_id: Uuid) -> Option<String> {
        sqlx::query_scalar("SELECT error FROM extraction_jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_one(&self.db.pool)
            .await
            .expect("Failed to read error column")
    }

    /// Overwrite the raw `error` column.
    pub async fn set_raw_error(&self, job_id: Uuid, raw: &str) {
        sqlx::query("UPDATE extraction_jobs SET error = ? WHERE id = ?")
            .bind(raw)
            .bind(job_id.to_string())
            .execute(&self.db.pool)
            .await
            .expect("Failed to write error column");
    }
}
