//! `insightd`: runs the extraction queue against a SQLite store until
//! interrupted.

use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use insight_core::defaults;
use insight_db::{log_pool_metrics, Database, PoolConfig};
use insight_jobs::{CommandExtractor, ExtractionQueue, WorkerConfig};

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "insightd=info,insight_db=info,insight_jobs=info")
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "insightd=info,insight_db=info,insight_jobs=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("insightd.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

/// Comma-separated topic list; blanks dropped.
fn parse_topics(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults::DATABASE_URL.to_string());
    let command = std::env::var("EXTRACTION_COMMAND")
        .context("EXTRACTION_COMMAND must name the extraction program")?;
    let extractor = CommandExtractor::from_command_line(&command)
        .context("EXTRACTION_COMMAND is empty")?;

    // Scheduled refresh of popular topics
    //   EXTRACTION_REFRESH_TOPICS        - comma-separated topics (optional)
    //   EXTRACTION_REFRESH_INTERVAL_SECS - refresh period (default: 86400)
    let refresh_topics = std::env::var("EXTRACTION_REFRESH_TOPICS")
        .map(|v| parse_topics(&v))
        .unwrap_or_default();
    let refresh_interval = std::env::var("EXTRACTION_REFRESH_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(24 * 60 * 60));

    let db = Database::connect_with_config(&database_url, PoolConfig::default())
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    log_pool_metrics(&db.pool);

    let config = WorkerConfig::from_env();
    info!(
        database_url = %database_url,
        workers = config.workers,
        job_timeout_secs = config.job_timeout.as_secs(),
        "Starting insightd"
    );

    let queue = ExtractionQueue::builder(db.jobs.clone())
        .with_config(config)
        .with_extractor(extractor)
        .build()?;
    queue.start().await.context("Failed to start extraction queue")?;

    let mut refresh = tokio::time::interval(refresh_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }
            _ = refresh.tick(), if !refresh_topics.is_empty() => {
                match queue.enqueue_refresh(&refresh_topics).await {
                    Ok(summary) => info!(
                        queued = summary.queued.len(),
                        skipped = summary.skipped.len(),
                        "Topic refresh scheduled"
                    ),
                    Err(e) => warn!(error = %e, "Topic refresh failed"),
                }
                match queue.health_report().await {
                    Ok(report) => info!(
                        queue_size = report.metrics.queue_size,
                        jobs_processing = report.metrics.jobs_processing,
                        completed_today = report.completed_today,
                        failed = report.status_counts.failed,
                        "Queue health"
                    ),
                    Err(e) => warn!(error = %e, "Failed to build health report"),
                }
            }
        }
    }

    queue.stop().await;
    db.pool.close().await;
    info!("insightd stopped");
    Ok(())
}
