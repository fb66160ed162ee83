//! # insight-jobs
//!
//! Durable background extraction queue.
//!
//! This crate provides:
//! - Priority scheduling with a fixed worker pool
//! - At most one active job per topic
//! - Transient/permanent failure classification with bounded retries
//! - Recovery of jobs orphaned by a crash or restart
//! - Progress and lifecycle notifications via a broadcast channel
//!
//! ## Example
//!
//! ```ignore
//! use insight_db::Database;
//! use insight_jobs::{ExtractionOutput, ExtractionQueue, WorkerConfig};
//!
//! let db = Database::connect("sqlite://insights.db").await?;
//! db.migrate().await?;
//!
//! let queue = ExtractionQueue::builder(db.jobs.clone())
//!     .with_config(WorkerConfig::from_env())
//!     .with_extractor_fn(|ctx| {
//!         ctx.report_progress(1);
//!         Ok(ExtractionOutput::new(12, 4))
//!     })
//!     .build()?;
//!
//! queue.start().await?;
//! let ticket = queue.add_job("rust async", "user-1", 5).await?;
//!
//! let mut events = queue.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! queue.stop().await;
//! ```

pub mod active;
pub mod classifier;
pub mod handler;
pub mod health;
pub mod queue;
pub mod recovery;
pub mod scheduler;
pub mod worker;

// Re-export core types
pub use insight_core::*;

pub use active::ActiveJobs;
pub use classifier::{classify, classify_error, decide, RetryDecision, TRANSIENT_PATTERNS};
pub use handler::{CommandExtractor, ExtractionError, Extractor, JobContext, ProgressCallback};
pub use queue::{ExtractionQueue, QueueBuilder};
pub use scheduler::{Dequeued, PriorityScheduler, QueuedJob};
pub use worker::{WorkerConfig, WorkerEvent};

/// Maximum retries per job, automatic and manual combined.
pub const DEFAULT_MAX_RETRIES: i32 = insight_core::defaults::JOB_MAX_RETRIES;
