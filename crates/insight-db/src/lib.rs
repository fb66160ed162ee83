//! # insight-db
//!
//! SQLite database layer for the insight extraction queue.
//!
//! This crate provides:
//! - Connection pool management (WAL journal, busy timeout)
//! - Embedded schema migrations
//! - The `SqliteJobRepository` implementation of `JobRepository`
//!
//! ## Example
//!
//! ```rust,ignore
//! use insight_db::{Database, JobRepository};
//!
//! let db = Database::connect("sqlite://insights.db").await?;
//! db.migrate().await?;
//!
//! let job_id = db.jobs.add("rust async", "user-1", 5).await?;
//! let job = db.jobs.get(job_id).await?;
//! ```

pub mod jobs;
pub mod pool;
pub mod timestamp;

// Always compiled so integration tests in dependent crates can use TestDatabase
pub mod test_fixtures;

// Re-export core types
pub use insight_core::*;

pub use jobs::SqliteJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

use sqlx::SqlitePool;

/// Combined database context.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: SqlitePool,
    /// Job repository for background extraction.
    pub jobs: SqliteJobRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            jobs: SqliteJobRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
