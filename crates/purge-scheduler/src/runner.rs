//! Job runner loop
//!
//! Claims due jobs from the shared table, runs the purge worker for each and
//! writes the outcome back. Periodic failures are re-queued with backoff by
//! the table; one-time failures are final.

use crate::error::{PurgeError, Result};
use crate::scheduler::CleanupScheduler;
use crate::types::{JobId, JobKind};
use crate::worker::{PurgeReport, PurgeWorker};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Longest sleep between two looks at the table
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Pause after the table itself could not be read or written
const ERROR_RETRY_DELAY: Duration = Duration::from_secs(5);

/// What happened to one claimed job
#[derive(Debug)]
pub struct JobOutcome {
    pub id: JobId,
    pub kind: JobKind,
    pub result: std::result::Result<PurgeReport, PurgeError>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(report) if report.is_success())
    }
}

pub struct JobRunner {
    scheduler: CleanupScheduler,
    worker: PurgeWorker,
}

impl JobRunner {
    pub fn new(scheduler: CleanupScheduler, worker: PurgeWorker) -> Self {
        Self { scheduler, worker }
    }

    /// Run every job due at `now` once
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<JobOutcome>> {
        let claimed = self.scheduler.claim_due(now).await?;
        let mut outcomes = Vec::with_capacity(claimed.len());

        for job in claimed {
            info!(job_id = job.id, directory = %job.payload.directory, "Running cleanup job");
            let result = self.worker.run(&job.payload).await;

            let recorded = match &result {
                Ok(report) if report.is_success() => Ok(()),
                Ok(report) => Err(report.summary()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(reason) = &recorded {
                error!(job_id = job.id, reason = %reason, "Cleanup job failed");
            }

            if let Err(e) = self.scheduler.complete(job.id, recorded, now).await {
                warn!(job_id = job.id, error = %e, "Failed to persist job outcome");
            }

            outcomes.push(JobOutcome {
                id: job.id,
                kind: job.kind,
                result,
            });
        }

        Ok(outcomes)
    }

    /// Run due jobs until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Cleanup job runner started");

        loop {
            let wait = match self.tick(Utc::now()).await {
                Ok(_) => self.idle_time().await,
                Err(e) => {
                    error!(error = %e, "Failed to claim due jobs");
                    ERROR_RETRY_DELAY
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.scheduler.woken() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Cleanup job runner stopped");
    }

    async fn idle_time(&self) -> Duration {
        match self.scheduler.next_due().await {
            Some(due) => (due - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(MAX_IDLE),
            None => MAX_IDLE,
        }
    }
}
