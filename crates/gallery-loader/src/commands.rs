//! Subcommand implementations

use crate::error::{AppError, Result};
use crate::types::{GalleryConfig, JobListing};
use chrono::Utc;
use image_fetch::{DynamicImage, FetchPipeline};
use purge_scheduler::{CleanupScheduler, JobOutcome, JobRunner, PurgeWorker, Registration};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use ttl_blob_store::{CacheDirectory, CacheStats, CacheStore};

/// What a `load` run did
#[derive(Debug)]
pub struct LoadSummary {
    pub requested: u32,
    pub cancelled: u32,
    pub delivered: usize,
    pub stats: CacheStats,
}

/// Create the cache directory if needed and validate it
async fn open_cache_dir(config: &GalleryConfig) -> Result<CacheDirectory> {
    tokio::fs::create_dir_all(&config.cache_dir).await?;
    Ok(CacheDirectory::new(&config.cache_dir)?)
}

/// Make sure the periodic cleanup for `directory` exists
async fn ensure_cleanup(
    scheduler: &CleanupScheduler,
    config: &GalleryConfig,
    directory: &CacheDirectory,
) -> Result<()> {
    match scheduler
        .register_periodic(config.cleanup_interval(), directory)
        .await?
    {
        Registration::Enqueued(id) => {
            info!(job_id = id, directory = %directory.identity(), "Registered periodic cleanup");
        }
        Registration::AlreadyRegistered(id) => {
            info!(job_id = id, "Periodic cleanup already registered");
        }
    }
    Ok(())
}

/// Load images `1..=count`, cancelling every `cancel_every`-th request
/// right after it is issued (0 disables)
pub async fn load(config: &GalleryConfig, count: u32, cancel_every: u32) -> Result<LoadSummary> {
    let directory = open_cache_dir(config).await?;
    let scheduler = CleanupScheduler::open(&config.job_table_path).await?;
    ensure_cleanup(&scheduler, config, &directory).await?;

    let store = Arc::new(CacheStore::with_directory(directory));
    let pipeline = FetchPipeline::builder(store.clone(), config.cache_ttl()).build()?;

    let delivered = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::with_capacity(count as usize);
    let mut cancelled = 0;

    for number in 1..=count {
        let url = config.image_url(number);
        let counter = delivered.clone();

        let handle = pipeline.load(url, move |image: DynamicImage| {
            info!(
                number,
                width = image.width(),
                height = image.height(),
                "Image ready"
            );
            counter.fetch_add(1, Ordering::SeqCst);
        });

        if cancel_every > 0 && number % cancel_every == 0 {
            handle.cancel();
            cancelled += 1;
        }
        handles.push(handle);
    }

    for handle in handles {
        handle.wait().await;
    }

    let stats = store.stats().await;
    let summary = LoadSummary {
        requested: count,
        cancelled,
        delivered: delivered.load(Ordering::SeqCst),
        stats,
    };

    info!(
        requested = summary.requested,
        cancelled = summary.cancelled,
        delivered = summary.delivered,
        entries = summary.stats.entries,
        hits = summary.stats.hits,
        misses = summary.stats.misses,
        "Load finished"
    );

    Ok(summary)
}

/// Enqueue a one-time purge of the cache directory and run it now
pub async fn purge(config: &GalleryConfig) -> Result<JobOutcome> {
    let directory = open_cache_dir(config).await?;
    let scheduler = CleanupScheduler::open(&config.job_table_path).await?;

    let id = scheduler.trigger_once(&directory).await?;
    info!(job_id = id, directory = %directory.identity(), "Triggered one-time cleanup");

    let runner = JobRunner::new(scheduler, PurgeWorker::new());
    let outcome = runner
        .tick(Utc::now())
        .await?
        .into_iter()
        .find(|outcome| outcome.id == id)
        .ok_or_else(|| AppError::Config(format!("cleanup job {} was not claimed", id)))?;

    match &outcome.result {
        Ok(report) if report.is_success() => info!("{}", report.summary()),
        Ok(report) => warn!("{}", report.summary()),
        Err(e) => error!(error = %e, "One-time cleanup failed"),
    }

    Ok(outcome)
}

/// Render the job table as pretty JSON
pub async fn jobs(config: &GalleryConfig) -> Result<String> {
    let scheduler = CleanupScheduler::open(&config.job_table_path).await?;
    let listing = JobListing {
        table_path: config.job_table_path.clone(),
        jobs: scheduler.jobs().await,
    };
    Ok(serde_json::to_string_pretty(&listing)?)
}

/// Run cleanup jobs until Ctrl-C
pub async fn daemon(config: &GalleryConfig) -> Result<()> {
    let directory = open_cache_dir(config).await?;
    let scheduler = CleanupScheduler::open(&config.job_table_path).await?;
    ensure_cleanup(&scheduler, config, &directory).await?;

    let shutdown = CancellationToken::new();
    let runner = JobRunner::new(scheduler, PurgeWorker::new());
    let runner_task = tokio::spawn(runner.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    shutdown.cancel();

    if let Err(e) = runner_task.await {
        error!("Job runner task failed: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use purge_scheduler::{JobKind, JobState};
    use std::path::Path;
    use tempfile::tempdir;

    fn config_in(root: &Path) -> GalleryConfig {
        GalleryConfig {
            cache_dir: root.join("images"),
            job_table_path: root.join("jobs.json"),
            ..GalleryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_purge_empties_cache_dir() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());
        std::fs::create_dir_all(config.cache_dir.join("nested")).unwrap();
        std::fs::write(config.cache_dir.join("a"), b"x").unwrap();
        std::fs::write(config.cache_dir.join("nested/b"), b"y").unwrap();

        let outcome = purge(&config).await.unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.kind, JobKind::OneTime);
        assert_eq!(std::fs::read_dir(&config.cache_dir).unwrap().count(), 0);
        // the table lives outside the purged directory
        assert!(config.job_table_path.exists());
    }

    #[tokio::test]
    async fn test_purge_creates_missing_cache_dir() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());

        let outcome = purge(&config).await.unwrap();
        assert!(outcome.succeeded());
        assert!(config.cache_dir.is_dir());
    }

    #[tokio::test]
    async fn test_jobs_lists_finished_purge() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());
        purge(&config).await.unwrap();

        let json = jobs(&config).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let listed = value["jobs"].as_array().unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["kind"]["type"], "one_time");
        assert_eq!(listed[0]["state"], "succeeded");
    }

    #[tokio::test]
    async fn test_jobs_on_empty_table() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());

        let json = jobs(&config).await.unwrap();
        assert!(json.contains("\"jobs\": []"));
    }

    #[tokio::test]
    async fn test_ensure_cleanup_is_idempotent() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());
        let directory = open_cache_dir(&config).await.unwrap();
        let scheduler = CleanupScheduler::open(&config.job_table_path).await.unwrap();

        ensure_cleanup(&scheduler, &config, &directory).await.unwrap();
        ensure_cleanup(&scheduler, &config, &directory).await.unwrap();

        let jobs = scheduler.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state, JobState::Enqueued);
        assert_eq!(jobs[0].kind, JobKind::Periodic { interval_secs: 900 });
    }

    #[tokio::test]
    async fn test_short_cleanup_interval_is_rejected() {
        let root = tempdir().unwrap();
        let config = GalleryConfig {
            cleanup_interval_secs: 60,
            ..config_in(root.path())
        };
        let directory = open_cache_dir(&config).await.unwrap();
        let scheduler = CleanupScheduler::open(&config.job_table_path).await.unwrap();

        let err = ensure_cleanup(&scheduler, &config, &directory).await.unwrap_err();
        assert!(matches!(err, AppError::Scheduler(_)));
        assert!(scheduler.jobs().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_with_everything_cancelled_delivers_nothing() {
        let root = tempdir().unwrap();
        let config = GalleryConfig {
            // unroutable, never actually reached
            image_url_template: "http://127.0.0.1:9/{}.jpg".to_string(),
            ..config_in(root.path())
        };

        let summary = load(&config, 3, 1).await.unwrap();
        assert_eq!(summary.requested, 3);
        assert_eq!(summary.cancelled, 3);
        assert_eq!(summary.delivered, 0);
    }
}
