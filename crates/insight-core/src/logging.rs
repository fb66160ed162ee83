//! Structured logging field name constants.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query every subsystem the same way.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue (timeouts, retries, stale jobs) |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Decision points, skipped jobs, config choices |
//! | TRACE | Per-poll noise (empty dequeues) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "jobs", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "scheduler", "recovery", "health"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "add", "dequeue", "recover", "retry"
pub const OPERATION: &str = "op";

/// Worker index within the pool.
pub const WORKER: &str = "worker";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Topic the job extracts insights for.
pub const TOPIC: &str = "topic";

/// User (or system sentinel) that requested the job.
pub const REQUESTER_ID: &str = "requester_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Job priority at enqueue time.
pub const PRIORITY: &str = "priority";

/// Retry attempt number.
pub const RETRY_COUNT: &str = "retry_count";

/// Number of queued scheduler entries.
pub const QUEUE_SIZE: &str = "queue_size";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error class ("transient" / "permanent").
pub const ERROR_KIND: &str = "error_kind";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
