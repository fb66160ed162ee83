//! Integration tests for SqliteJobRepository.
//!
//! This test suite validates:
//! - Store-001: Insert and read back every persisted field
//! - Store-002: One active job per topic (guarded insert + unique index)
//! - Store-003: Partial updates bump updated_at and respect the state machine
//! - Store-004: Stale detection for orphaned processing jobs
//! - Store-005: Structured error JSON survives storage byte-for-byte
//! - Store-006: Aggregates used by the health report
//!
//! Each test gets its own migrated SQLite file via `TestDatabase`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use insight_db::test_fixtures::TestDatabase;
use insight_db::{
    utc_now, Error, ErrorKind, ExtractionOutput, JobError, JobRepository, JobStatus, JobUpdate,
};
use uuid::Uuid;

// ============================================================================
// Store-001: insert and read back
// ============================================================================

#[tokio::test]
async fn test_add_creates_queued_job() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs.add("rust async", "user-1", 5).await.unwrap();
    let job = jobs.get(job_id).await.unwrap().expect("job should exist");

    assert_eq!(job.id, job_id);
    assert_eq!(job.topic, "rust async");
    assert_eq!(job.requester_id, "user-1");
    assert_eq!(job.priority, 5);
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.insight_count, 0);
    assert_eq!(job.sources_processed, 0);
    assert!(job.error.is_none());
    assert!(job.duration_seconds.is_none());
    assert!(job.last_retry_at.is_none());
    assert!(job.estimated_completion_at.is_none());
    assert_eq!(job.created_at, job.updated_at);
}

#[tokio::test]
async fn test_full_record_round_trip() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs.add("distributed systems", "user-7", 9).await.unwrap();
    let eta = utc_now() + ChronoDuration::seconds(900);
    jobs.update(job_id, JobUpdate::processing(eta)).await.unwrap();

    let retry_at = utc_now();
    jobs.update(job_id, JobUpdate::requeue(1, retry_at))
        .await
        .unwrap();
    jobs.update(job_id, JobUpdate::processing(eta)).await.unwrap();
    jobs.update(
        job_id,
        JobUpdate::complete(ExtractionOutput::new(42, 11), 12.5),
    )
    .await
    .unwrap();

    let first = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Complete);
    assert_eq!(first.insight_count, 42);
    assert_eq!(first.sources_processed, 11);
    assert_eq!(first.duration_seconds, Some(12.5));
    assert_eq!(first.retry_count, 1);
    assert_eq!(first.last_retry_at, Some(retry_at));
    assert_eq!(first.estimated_completion_at, Some(eta));

    // A second read is identical field for field.
    let second = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_get_unknown_job_is_none() {
    let test_db = TestDatabase::new().await;
    assert!(test_db.db.jobs.get(Uuid::now_v7()).await.unwrap().is_none());
    assert!(test_db
        .db
        .jobs
        .get_by_topic("never seen")
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Store-002: one active job per topic
// ============================================================================

#[tokio::test]
async fn test_duplicate_add_rejected() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    jobs.add("topic-a", "u1", 5).await.unwrap();
    let err = jobs.add("topic-a", "u2", 9).await.unwrap_err();

    match err {
        Error::DuplicateJob { topic, status } => {
            assert_eq!(topic, "topic-a");
            assert_eq!(status, JobStatus::Queued);
        }
        other => panic!("Expected DuplicateJob, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_add_reports_processing_status() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs.add("topic-b", "u1", 5).await.unwrap();
    jobs.update(job_id, JobUpdate::processing(utc_now()))
        .await
        .unwrap();

    let err = jobs.add("topic-b", "u2", 5).await.unwrap_err();
    assert!(matches!(
        err,
        Error::DuplicateJob {
            status: JobStatus::Processing,
            ..
        }
    ));
}

#[tokio::test]
async fn test_add_allowed_after_terminal_state() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let first = jobs.add("topic-c", "u1", 5).await.unwrap();
    jobs.update(first, JobUpdate::processing(utc_now()))
        .await
        .unwrap();
    jobs.update(first, JobUpdate::complete(ExtractionOutput::new(3, 2), 1.0))
        .await
        .unwrap();

    let second = jobs.add("topic-c", "u2", 5).await.unwrap();
    assert_ne!(first, second);

    let latest = jobs.get_by_topic("topic-c").await.unwrap().unwrap();
    assert_eq!(latest.id, second);
    assert_eq!(latest.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_concurrent_adds_admit_exactly_one() {
    let test_db = TestDatabase::new().await;
    let jobs = Arc::new(test_db.db.jobs.clone());

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let jobs = jobs.clone();
        tasks.spawn(async move { jobs.add("hot topic", &format!("user-{i}"), 5).await });
    }

    let mut admitted = 0;
    let mut rejected = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => admitted += 1,
            Err(e) if e.is_duplicate() => rejected += 1,
            Err(e) => panic!("Unexpected error: {e}"),
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(rejected, 7);
}

#[tokio::test]
async fn test_manual_requeue_blocked_by_newer_active_job() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let old = jobs.add("topic-d", "u1", 5).await.unwrap();
    jobs.update(old, JobUpdate::processing(utc_now()))
        .await
        .unwrap();
    jobs.update(
        old,
        JobUpdate::failed(JobError::new(ErrorKind::Permanent, "bad", false)),
    )
    .await
    .unwrap();

    jobs.add("topic-d", "u2", 5).await.unwrap();

    let err = jobs
        .update(old, JobUpdate::manual_retry(1, utc_now()))
        .await
        .unwrap_err();
    assert!(err.is_duplicate(), "got {err:?}");
}

// ============================================================================
// Store-003: partial updates and the state machine
// ============================================================================

#[tokio::test]
async fn test_update_bumps_updated_at() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs.add("topic-e", "u1", 5).await.unwrap();
    let before = jobs.get(job_id).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    jobs.update(job_id, JobUpdate::progress(4)).await.unwrap();

    let after = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(after.sources_processed, 4);
    assert_eq!(after.status, JobStatus::Queued);
    assert!(after.updated_at > before.updated_at);
    assert_eq!(after.created_at, before.created_at);
}

#[tokio::test]
async fn test_illegal_transitions_rejected() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs.add("topic-f", "u1", 5).await.unwrap();

    // queued -> complete skips processing
    let err = jobs
        .update(job_id, JobUpdate::complete(ExtractionOutput::default(), 0.0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            to: JobStatus::Complete,
            ..
        }
    ));

    // queued -> queued
    let err = jobs
        .update(job_id, JobUpdate::requeue(1, utc_now()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    // nothing was written by the rejected updates
    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 0);

    jobs.update(job_id, JobUpdate::processing(utc_now()))
        .await
        .unwrap();
    jobs.update(job_id, JobUpdate::complete(ExtractionOutput::default(), 0.1))
        .await
        .unwrap();

    // complete is terminal
    let err = jobs
        .update(job_id, JobUpdate::processing(utc_now()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_requeue_guards_do_not_overlap() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs.add("topic-guard", "u1", 5).await.unwrap();
    jobs.update(job_id, JobUpdate::processing(utc_now()))
        .await
        .unwrap();
    jobs.update(
        job_id,
        JobUpdate::failed(JobError::new(ErrorKind::Transient, "Connection timeout", false)),
    )
    .await
    .unwrap();

    // A failed job is not resurrected by a worker or recovery requeue.
    for update in [JobUpdate::requeue(1, utc_now()), JobUpdate::recovered()] {
        let err = jobs.update(job_id, update).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                to: JobStatus::Queued,
                ..
            }
        ));
    }
    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert!(job.error.is_some());

    jobs.update(job_id, JobUpdate::manual_retry(1, utc_now()))
        .await
        .unwrap();
    jobs.update(job_id, JobUpdate::processing(utc_now()))
        .await
        .unwrap();

    // And a processing job is not a manual-retry target.
    let err = jobs
        .update(job_id, JobUpdate::manual_retry(2, utc_now()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    jobs.update(job_id, JobUpdate::recovered()).await.unwrap();
    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 1);
}

#[tokio::test]
async fn test_update_unknown_job_not_found() {
    let test_db = TestDatabase::new().await;
    let err = test_db
        .db
        .jobs
        .update(Uuid::now_v7(), JobUpdate::progress(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// ============================================================================
// Store-004: stale detection
// ============================================================================

#[tokio::test]
async fn test_find_stale_only_old_processing_jobs() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let stale = jobs.add("stale", "u1", 7).await.unwrap();
    let fresh = jobs.add("fresh", "u1", 5).await.unwrap();
    let old_queued = jobs.add("old queued", "u1", 5).await.unwrap();

    let long_ago = utc_now() - ChronoDuration::minutes(30);
    test_db
        .force_state(stale, JobStatus::Processing, long_ago)
        .await;
    test_db
        .force_state(fresh, JobStatus::Processing, utc_now())
        .await;
    test_db
        .force_state(old_queued, JobStatus::Queued, long_ago)
        .await;

    let found = jobs.find_stale(Duration::from_secs(20 * 60)).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, stale);
    assert_eq!(found[0].priority, 7);
}

#[tokio::test]
async fn test_find_by_status_orders_by_priority() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let low = jobs.add("low", "u1", 1).await.unwrap();
    let high = jobs.add("high", "u1", 10).await.unwrap();
    let mid_first = jobs.add("mid-1", "u1", 5).await.unwrap();
    let mid_second = jobs.add("mid-2", "u1", 5).await.unwrap();

    let queued: Vec<Uuid> = jobs
        .find_by_status(JobStatus::Queued)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(queued, vec![high, mid_first, mid_second, low]);
}

// ============================================================================
// Store-005: structured error storage
// ============================================================================

#[tokio::test]
async fn test_error_json_stored_byte_for_byte() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs.add("topic-g", "u1", 5).await.unwrap();
    jobs.update(job_id, JobUpdate::processing(utc_now()))
        .await
        .unwrap();

    let error = JobError::new(ErrorKind::Transient, "Connection timeout (\"upstream\")", false);
    jobs.update(job_id, JobUpdate::failed(error.clone()))
        .await
        .unwrap();

    let raw = test_db.raw_error(job_id).await.expect("error stored");
    assert_eq!(raw, error.to_json().unwrap());

    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.error, Some(error.clone()));
    assert_eq!(job.error.unwrap().to_json().unwrap(), raw);
}

#[tokio::test]
async fn test_requeue_clears_error() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs.add("topic-h", "u1", 5).await.unwrap();
    jobs.update(job_id, JobUpdate::processing(utc_now()))
        .await
        .unwrap();
    jobs.update(
        job_id,
        JobUpdate::failed(JobError::new(ErrorKind::Permanent, "nope", false)),
    )
    .await
    .unwrap();
    jobs.update(job_id, JobUpdate::manual_retry(1, utc_now()))
        .await
        .unwrap();

    assert!(test_db.raw_error(job_id).await.is_none());
    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.error.is_none());
}

#[tokio::test]
async fn test_legacy_error_text_parsed_as_unknown() {
    let test_db = TestDatabase::new().await;
    let job_id = test_db.db.jobs.add("topic-i", "u1", 5).await.unwrap();
    test_db.set_raw_error(job_id, "something broke").await;

    let job = test_db.db.jobs.get(job_id).await.unwrap().unwrap();
    let error = job.error.expect("error parsed");
    assert_eq!(error.kind, ErrorKind::Unknown);
    assert_eq!(error.message, "something broke");
    assert!(!error.retry_eligible);
}

// ============================================================================
// Store-006: aggregates
// ============================================================================

#[tokio::test]
async fn test_health_aggregates() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    for (topic, secs) in [("done-1", 2.0), ("done-2", 4.0)] {
        let id = jobs.add(topic, "u1", 5).await.unwrap();
        jobs.update(id, JobUpdate::processing(utc_now()))
            .await
            .unwrap();
        jobs.update(id, JobUpdate::complete(ExtractionOutput::new(1, 1), secs))
            .await
            .unwrap();
    }

    let mut failed_ids = Vec::new();
    for i in 0..7 {
        let id = jobs.add(&format!("broken-{i}"), "u1", 5).await.unwrap();
        jobs.update(id, JobUpdate::processing(utc_now()))
            .await
            .unwrap();
        jobs.update(
            id,
            JobUpdate::failed(JobError::new(ErrorKind::Permanent, format!("err {i}"), false)),
        )
        .await
        .unwrap();
        failed_ids.push(id);
    }

    jobs.add("waiting", "u1", 5).await.unwrap();

    let stats = jobs
        .completion_stats(utc_now() - ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.avg_duration_seconds, Some(3.0));

    let future = jobs
        .completion_stats(utc_now() + ChronoDuration::hours(1))
        .await
        .unwrap();
    // The cutoff scopes the count only.
    assert_eq!(future.completed, 0);
    assert_eq!(future.avg_duration_seconds, Some(3.0));

    let failures = jobs.recent_failures(5).await.unwrap();
    assert_eq!(failures.len(), 5);
    assert_eq!(failures[0].id, *failed_ids.last().unwrap());
    assert!(failures.iter().all(|job| job.status == JobStatus::Failed));

    let counts = jobs.status_counts().await.unwrap();
    assert_eq!(counts.complete, 2);
    assert_eq!(counts.failed, 7);
    assert_eq!(counts.queued, 1);
    assert_eq!(counts.processing, 0);
    assert_eq!(counts.total(), 10);
}

#[tokio::test]
async fn test_average_duration_spans_all_completions() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let old = jobs.add("archived", "u1", 5).await.unwrap();
    jobs.update(old, JobUpdate::processing(utc_now()))
        .await
        .unwrap();
    jobs.update(old, JobUpdate::complete(ExtractionOutput::new(1, 1), 120.0))
        .await
        .unwrap();
    test_db
        .force_state(old, JobStatus::Complete, utc_now() - ChronoDuration::days(2))
        .await;

    let recent = jobs.add("fresh", "u1", 5).await.unwrap();
    jobs.update(recent, JobUpdate::processing(utc_now()))
        .await
        .unwrap();
    jobs.update(recent, JobUpdate::complete(ExtractionOutput::new(1, 1), 60.0))
        .await
        .unwrap();

    let stats = jobs
        .completion_stats(utc_now() - ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.avg_duration_seconds, Some(90.0));
}
