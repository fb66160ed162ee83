//! Extraction callables and the context they run with.

use std::ffi::OsString;
use std::process::Command;

use anyhow::Context as _;
use thiserror::Error;
use uuid::Uuid;

use insight_core::{ExtractionOutput, Job};

/// Failure returned by an [`Extractor`].
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Worth retrying (rate limits, flaky upstreams).
    #[error("{0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("{0}")]
    Permanent(String),

    /// The attempt outlived the soft timeout.
    #[error("Extraction timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The extractor panicked.
    #[error("Extraction panicked: {0}")]
    Panicked(String),

    /// Anything else; classified by message.
    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

/// Progress callback type for extractors.
pub type ProgressCallback = Box<dyn Fn(i64) + Send + Sync>;

/// Context provided to an extractor for one attempt.
pub struct JobContext {
    pub job_id: Uuid,
    pub topic: String,
    pub requester_id: String,
    /// Retries already spent before this attempt.
    pub retry_count: i32,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a context for the given job.
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id,
            topic: job.topic.clone(),
            requester_id: job.requester_id.clone(),
            retry_count: job.retry_count,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report how many sources have been processed so far.
    ///
    /// Never blocks: the store write happens asynchronously.
    pub fn report_progress(&self, sources_processed: i64) {
        if let Some(ref callback) = self.progress_callback {
            callback(sources_processed);
        }
    }
}

/// The blocking extraction work run for each job.
///
/// Implementations run on the blocking thread pool and may take minutes.
pub trait Extractor: Send + Sync {
    fn extract(&self, ctx: &JobContext) -> Result<ExtractionOutput, ExtractionError>;
}

impl<F> Extractor for F
where
    F: Fn(&JobContext) -> Result<ExtractionOutput, ExtractionError> + Send + Sync,
{
    fn extract(&self, ctx: &JobContext) -> Result<ExtractionOutput, ExtractionError> {
        self(ctx)
    }
}

/// Runs an external program as `<program> [args..] <topic> <requester_id>`
/// and reads `{"insight_count": n, "sources_processed": m}` from stdout.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Split a whitespace-separated command line such as `python extract.py`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(parts.fold(Self::new(program), |cmd, arg| cmd.arg(arg)))
    }

    /// Append a fixed argument placed before the topic.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Extractor for CommandExtractor {
    fn extract(&self, ctx: &JobContext) -> Result<ExtractionOutput, ExtractionError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&ctx.topic)
            .arg(&ctx.requester_id)
            .output()
            .with_context(|| format!("failed to run {:?}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!(
                "extraction command exited with {}: {}",
                output.status,
                stderr.trim()
            )
            .into());
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractionError::Permanent(format!("invalid extraction output: {e}")))
    }
}
