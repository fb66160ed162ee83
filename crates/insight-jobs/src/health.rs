//! Queue health aggregation.

use chrono::{TimeZone, Utc};

use insight_core::defaults::HEALTH_RECENT_FAILURES;
use insight_core::{
    utc_now, FailureSummary, HealthMetrics, HealthReport, JobRepository, Result,
};

/// Combine live metrics with stored history.
///
/// `completed_today` counts jobs completed since UTC midnight;
/// `avg_duration_seconds` covers every completed job.
pub async fn health_report(
    store: &dyn JobRepository,
    metrics: HealthMetrics,
) -> Result<HealthReport> {
    let midnight = utc_now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(utc_now);

    let stats = store.completion_stats(midnight).await?;
    let recent_failures = store
        .recent_failures(HEALTH_RECENT_FAILURES)
        .await?
        .into_iter()
        .map(FailureSummary::from)
        .collect();
    let status_counts = store.status_counts().await?;

    Ok(HealthReport {
        metrics,
        recent_failures,
        avg_duration_seconds: stats.avg_duration_seconds,
        completed_today: stats.completed,
        status_counts,
    })
}
