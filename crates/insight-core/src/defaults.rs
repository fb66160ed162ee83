//! Centralized default constants for the insight extraction queue.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic numbers.

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Maximum number of retries (automatic and manual combined) per job.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Number of worker tasks in the pool.
pub const JOB_WORKERS: usize = 2;

/// Soft per-job timeout in seconds (15 minutes).
pub const JOB_TIMEOUT_SECS: u64 = 900;

/// A `processing` job not updated for this long is considered orphaned (20 minutes).
pub const JOB_STALE_AFTER_SECS: u64 = 1200;

/// Upper bound on a single blocking dequeue wait in milliseconds.
pub const JOB_DEQUEUE_TIMEOUT_MS: u64 = 1000;

/// Bounded wait per worker during graceful shutdown, in seconds.
pub const JOB_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Pause before a worker retries a failed store write, or puts a job it
/// could not claim back on the scheduler, in milliseconds.
pub const JOB_STORE_RETRY_BACKOFF_MS: u64 = 500;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// PRIORITIES (higher value dequeues first)
// =============================================================================

/// Default priority for `add_job` callers that have no opinion.
pub const PRIORITY_DEFAULT: i32 = 5;

/// User-triggered extraction: benefits one user and can wait.
pub const PRIORITY_USER: i32 = 1;

/// Automatic retries are demoted so they never starve fresh work.
pub const PRIORITY_RETRY: i32 = 1;

/// Manual retries jump ahead of the backlog.
pub const PRIORITY_MANUAL_RETRY: i32 = 10;

/// Scheduled refresh of popular topics: benefits every follower.
pub const PRIORITY_REFRESH: i32 = 10;

/// Requester id recorded for jobs the system schedules on its own.
pub const SYSTEM_REQUESTER: &str = "system";

// =============================================================================
// HEALTH
// =============================================================================

/// Number of recent failures included in a health report.
pub const HEALTH_RECENT_FAILURES: i64 = 5;

// =============================================================================
// DATABASE
// =============================================================================

/// Default database location when `DATABASE_URL` is not set.
pub const DATABASE_URL: &str = "sqlite://insights.db";

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 8;

/// Default connection acquire timeout in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// How long SQLite waits on a locked database before failing a statement.
pub const DB_BUSY_TIMEOUT_SECS: u64 = 5;
