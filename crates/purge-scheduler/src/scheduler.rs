//! Cleanup job registration
//!
//! Periodic purges are unique per cache directory: registering again for the
//! same directory keeps the existing job. One-time purges are never
//! deduplicated and live independently of any periodic job.

use crate::error::{Result, SchedulerError};
use crate::policy::MIN_PERIODIC_INTERVAL;
use crate::table::JobTable;
use crate::types::{JobId, JobKind, JobRecord, PurgePayload};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tracing::{debug, info, warn};
use ttl_blob_store::CacheDirectory;

const PERIODIC_KEY_PREFIX: &str = "periodic-cleanup:";

/// Result of a periodic registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Enqueued(JobId),
    /// A periodic job already exists for the directory; nothing changed
    AlreadyRegistered(JobId),
}

impl Registration {
    pub fn job_id(self) -> JobId {
        match self {
            Registration::Enqueued(id) | Registration::AlreadyRegistered(id) => id,
        }
    }
}

/// Handle to the shared job table; cheap to clone
#[derive(Clone)]
pub struct CleanupScheduler {
    table: Arc<Mutex<JobTable>>,
    wake: Arc<Notify>,
}

impl CleanupScheduler {
    /// Open (or create) the job table persisted at `table_path`
    pub async fn open(table_path: impl AsRef<Path>) -> Result<Self> {
        let table = JobTable::open(table_path).await?;
        Ok(Self {
            table: Arc::new(Mutex::new(table)),
            wake: Arc::new(Notify::new()),
        })
    }

    /// Unique key of the periodic job for `directory`
    pub fn periodic_key(directory: &CacheDirectory) -> String {
        format!("{}{}", PERIODIC_KEY_PREFIX, directory.identity())
    }

    /// Register a recurring purge of `directory` every `interval`.
    ///
    /// Fails if `interval` is below [`MIN_PERIODIC_INTERVAL`], in which case
    /// nothing is enqueued. A second registration for the same directory is
    /// a no-op.
    pub async fn register_periodic(
        &self,
        interval: Duration,
        directory: &CacheDirectory,
    ) -> Result<Registration> {
        if interval < MIN_PERIODIC_INTERVAL {
            return Err(SchedulerError::Config(format!(
                "interval cannot be smaller than {} minutes",
                MIN_PERIODIC_INTERVAL.as_secs() / 60
            )));
        }
        if chrono::Duration::from_std(interval).is_err() {
            return Err(SchedulerError::Config(format!(
                "interval of {} seconds is too large",
                interval.as_secs()
            )));
        }

        let key = Self::periodic_key(directory);
        let payload = PurgePayload::for_directory(directory);
        let kind = JobKind::Periodic {
            interval_secs: interval.as_secs(),
        };

        let registration = self
            .table
            .lock()
            .await
            .update(move |table| {
                if let Some(existing) = table.find_unique(&key) {
                    return Registration::AlreadyRegistered(existing.id);
                }
                let now = Utc::now();
                Registration::Enqueued(table.insert(kind, Some(key), payload, now, now))
            })
            .await?;

        match registration {
            Registration::Enqueued(id) => {
                info!(
                    job_id = id,
                    directory = %directory.identity(),
                    interval_secs = interval.as_secs(),
                    "Registered periodic cleanup"
                );
                self.wake.notify_one();
            }
            Registration::AlreadyRegistered(id) => {
                debug!(
                    job_id = id,
                    directory = %directory.identity(),
                    "Periodic cleanup already registered"
                );
            }
        }

        Ok(registration)
    }

    /// Enqueue a single immediate purge of `directory`
    pub async fn trigger_once(&self, directory: &CacheDirectory) -> Result<JobId> {
        let payload = PurgePayload::for_directory(directory);
        let id = self
            .table
            .lock()
            .await
            .update(move |table| {
                let now = Utc::now();
                table.insert(JobKind::OneTime, None, payload, now, now)
            })
            .await?;

        info!(job_id = id, directory = %directory.identity(), "Enqueued one-time cleanup");
        self.wake.notify_one();
        Ok(id)
    }

    /// Remove the periodic job for `directory`, returning whether one existed
    pub async fn cancel_periodic(&self, directory: &CacheDirectory) -> Result<bool> {
        let key = Self::periodic_key(directory);
        let removed = self
            .table
            .lock()
            .await
            .update(move |table| table.remove_unique(&key))
            .await?;

        if removed {
            info!(directory = %directory.identity(), "Cancelled periodic cleanup");
        }
        Ok(removed)
    }

    pub async fn job(&self, id: JobId) -> Option<JobRecord> {
        self.refreshed().await.get(id).cloned()
    }

    pub async fn jobs(&self) -> Vec<JobRecord> {
        self.refreshed().await.jobs().to_vec()
    }

    /// Claim every job due at `now`. The claim is persisted before any work
    /// starts; if that fails nothing is claimed.
    pub(crate) async fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        self.table
            .lock()
            .await
            .update(move |table| {
                table.prune(now);
                table.claim_due(now)
            })
            .await
    }

    /// Record a job outcome
    pub(crate) async fn complete(
        &self,
        id: JobId,
        outcome: std::result::Result<(), String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.table
            .lock()
            .await
            .update(move |table| table.complete(id, outcome, now))
            .await
    }

    pub(crate) async fn next_due(&self) -> Option<DateTime<Utc>> {
        self.refreshed().await.next_due()
    }

    /// The table with changes from other processes picked up. A failed read
    /// keeps the last known state.
    async fn refreshed(&self) -> MutexGuard<'_, JobTable> {
        let mut table = self.table.lock().await;
        if let Err(e) = table.reload().await {
            warn!(path = %table.path().display(), error = %e, "Failed to re-read job table");
        }
        table
    }

    pub(crate) async fn woken(&self) {
        self.wake.notified().await
    }
}
