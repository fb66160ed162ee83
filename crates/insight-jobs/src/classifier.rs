//! Failure classification and retry decisions.

use insight_core::ErrorKind;

use crate::handler::ExtractionError;

/// Substrings (matched case-insensitively) that mark an opaque error as
/// transient.
pub const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "connection",
    "rate limit",
    "503",
    "502",
    "429",
    "temporary",
];

/// Classify an error message by pattern.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// Classify an extraction failure.
///
/// Typed variants decide on their own; only `Other` falls back to pattern
/// matching over its full error chain.
pub fn classify_error(err: &ExtractionError) -> ErrorKind {
    match err {
        ExtractionError::Transient(_) | ExtractionError::Timeout { .. } => ErrorKind::Transient,
        ExtractionError::Permanent(_) | ExtractionError::Panicked(_) => ErrorKind::Permanent,
        ExtractionError::Other(e) => classify(&format!("{e:#}")),
    }
}

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue with `attempt` as the new retry count.
    Retry { attempt: i32 },
    /// Mark the job failed.
    Fail,
}

/// Transient failures retry while `retry_count < max_retries`.
pub fn decide(kind: ErrorKind, retry_count: i32, max_retries: i32) -> RetryDecision {
    if kind.is_transient() && retry_count < max_retries {
        RetryDecision::Retry {
            attempt: retry_count + 1,
        }
    } else {
        RetryDecision::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_transient_patterns() {
        for msg in [
            "Connection timeout",
            "connection refused",
            "Rate limit exceeded",
            "HTTP 503 Service Unavailable",
            "upstream returned 502",
            "429 Too Many Requests",
            "Temporary failure in name resolution",
            "read TIMEOUT",
        ] {
            assert_eq!(classify(msg), ErrorKind::Transient, "{msg}");
        }
    }

    #[test]
    fn test_permanent_by_default() {
        for msg in ["Invalid topic format", "missing API key", "HTTP 404", ""] {
            assert_eq!(classify(msg), ErrorKind::Permanent, "{msg}");
        }
    }

    #[test]
    fn test_typed_errors_win_over_patterns() {
        let err = ExtractionError::Permanent("connection string is malformed".into());
        assert_eq!(classify_error(&err), ErrorKind::Permanent);

        let err = ExtractionError::Transient("model overloaded".into());
        assert_eq!(classify_error(&err), ErrorKind::Transient);

        let err = ExtractionError::Timeout { secs: 900 };
        assert_eq!(classify_error(&err), ErrorKind::Transient);

        let err = ExtractionError::Panicked("index out of bounds".into());
        assert_eq!(classify_error(&err), ErrorKind::Permanent);
    }

    #[test]
    fn test_opaque_error_chain_is_searched() {
        let err = ExtractionError::from(anyhow!("503 from search backend").context("fetching sources"));
        assert_eq!(classify_error(&err), ErrorKind::Transient);

        let err = ExtractionError::from(anyhow!("unsupported language"));
        assert_eq!(classify_error(&err), ErrorKind::Permanent);
    }

    #[test]
    fn test_decide() {
        assert_eq!(
            decide(ErrorKind::Transient, 0, 3),
            RetryDecision::Retry { attempt: 1 }
        );
        assert_eq!(
            decide(ErrorKind::Transient, 2, 3),
            RetryDecision::Retry { attempt: 3 }
        );
        assert_eq!(decide(ErrorKind::Transient, 3, 3), RetryDecision::Fail);
        assert_eq!(decide(ErrorKind::Permanent, 0, 3), RetryDecision::Fail);
        assert_eq!(decide(ErrorKind::Unknown, 0, 3), RetryDecision::Fail);
    }
}
