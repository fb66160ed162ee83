//! Error types for the insight extraction queue.

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Result type alias using insight's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for insight operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An active (queued or processing) job already exists for the topic.
    #[error("Job already {status} for topic: {topic}")]
    DuplicateJob { topic: String, status: JobStatus },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A status update was rejected because the job is not in a legal
    /// predecessor state.
    #[error("Invalid transition for job {job_id}: cannot move to {to}")]
    InvalidTransition { job_id: Uuid, to: JobStatus },

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error is a duplicate-submission rejection.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateJob { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
