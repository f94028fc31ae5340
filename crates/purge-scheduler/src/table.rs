//! Persisted job table
//!
//! The table is a single JSON document rewritten (temp file + rename) after
//! every change, so scheduled jobs, their uniqueness keys and their backoff
//! state all survive a restart.
//!
//! Several processes may share one table. Every change takes an exclusive
//! lock on `<table>.lock`, re-reads the document, applies the change and
//! saves it before releasing the lock. Each open table also holds a shared
//! lock on `<table>.owners` for its whole lifetime; `Running` jobs are only
//! treated as abandoned by a table that finds no other owner.

use crate::error::Result;
use crate::policy::{after, backoff_delay, FINISHED_JOB_RETENTION};
use crate::types::{JobId, JobKind, JobRecord, JobState, PurgePayload};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TableDocument {
    next_id: JobId,
    jobs: Vec<JobRecord>,
}

pub struct JobTable {
    path: PathBuf,
    doc: TableDocument,
    /// Shared lock on `<table>.owners`, released on drop
    _owner: Option<File>,
}

impl JobTable {
    /// Load the table at `path`, or start an empty one if the file is absent.
    ///
    /// When no other process has the table open, jobs left `Running` by a
    /// process that died mid-run are put back in the queue, due immediately.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let owners_path = sibling(&path, "owners");
        let (owner, sole_owner) = blocking(move || {
            let file = open_lock_file(&owners_path)?;
            let sole = FileExt::try_lock_exclusive(&file).is_ok();
            Ok((file, sole))
        })
        .await?;

        let mut table = Self {
            path,
            doc: TableDocument::default(),
            _owner: None,
        };

        if sole_owner {
            table.requeue_abandoned().await?;
        } else {
            table.reload().await?;
        }

        // downgrade to a shared lock so later tables see a live owner
        table._owner = Some(
            blocking(move || {
                if sole_owner {
                    FileExt::unlock(&owner)?;
                }
                FileExt::lock_shared(&owner)?;
                Ok(owner)
            })
            .await?,
        );

        info!(path = %table.path.display(), jobs = table.doc.jobs.len(), "Job table loaded");
        Ok(table)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: JobId) -> Option<&JobRecord> {
        self.doc.jobs.iter().find(|j| j.id == id)
    }

    pub fn jobs(&self) -> &[JobRecord] {
        &self.doc.jobs
    }

    pub fn find_unique(&self, key: &str) -> Option<&JobRecord> {
        self.doc
            .jobs
            .iter()
            .find(|j| j.unique_key.as_deref() == Some(key))
    }

    /// Add a job due at `due`, returning its id
    pub fn insert(
        &mut self,
        kind: JobKind,
        unique_key: Option<String>,
        payload: PurgePayload,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JobId {
        self.doc.next_id += 1;
        let id = self.doc.next_id;

        self.doc.jobs.push(JobRecord {
            id,
            kind,
            unique_key,
            payload,
            state: JobState::Enqueued,
            next_due: due,
            failures: 0,
            created_at: now,
            last_run: None,
            last_error: None,
        });

        id
    }

    pub fn remove_unique(&mut self, key: &str) -> bool {
        let before = self.doc.jobs.len();
        self.doc
            .jobs
            .retain(|j| j.unique_key.as_deref() != Some(key));
        self.doc.jobs.len() != before
    }

    /// Mark every due job `Running` and hand back copies of them
    pub fn claim_due(&mut self, now: DateTime<Utc>) -> Vec<JobRecord> {
        let mut claimed = Vec::new();
        for job in self.doc.jobs.iter_mut().filter(|j| j.is_due(now)) {
            job.state = JobState::Running;
            job.last_run = Some(now);
            claimed.push(job.clone());
        }
        claimed
    }

    /// Record the outcome of a claimed job.
    ///
    /// Periodic jobs go back in the queue: after `interval` on success, after
    /// the backoff delay on failure. One-time jobs end in a terminal state.
    pub fn complete(
        &mut self,
        id: JobId,
        outcome: std::result::Result<(), String>,
        now: DateTime<Utc>,
    ) {
        let Some(job) = self.doc.jobs.iter_mut().find(|j| j.id == id) else {
            // cancelled while running
            debug!(job_id = id, "Completed job no longer in table");
            return;
        };

        match (job.kind, outcome) {
            (JobKind::Periodic { interval_secs }, Ok(())) => {
                job.state = JobState::Enqueued;
                job.failures = 0;
                job.last_error = None;
                job.next_due = after(now, Duration::from_secs(interval_secs));
            }
            (JobKind::Periodic { .. }, Err(reason)) => {
                job.state = JobState::Enqueued;
                job.failures = job.failures.saturating_add(1);
                job.last_error = Some(reason);
                job.next_due = after(now, backoff_delay(job.failures));
            }
            (JobKind::OneTime, Ok(())) => {
                job.state = JobState::Succeeded;
                job.last_error = None;
            }
            (JobKind::OneTime, Err(reason)) => {
                job.state = JobState::Failed;
                job.failures = job.failures.saturating_add(1);
                job.last_error = Some(reason);
            }
        }
    }

    /// Drop terminal one-time jobs that finished more than a day ago
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.doc.jobs.len();

        self.doc.jobs.retain(|j| {
            !(j.state.is_terminal()
                && j.last_run
                    .map_or(false, |run| after(run, FINISHED_JOB_RETENTION) <= now))
        });

        let pruned = before - self.doc.jobs.len();
        if pruned > 0 {
            debug!(pruned, "Pruned finished jobs");
        }
        pruned
    }

    /// Earliest due time among queued jobs
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.doc
            .jobs
            .iter()
            .filter(|j| j.state == JobState::Enqueued)
            .map(|j| j.next_due)
            .min()
    }

    /// Apply `change` to the latest on-disk state and persist it, all under
    /// the table's exclusive lock. If saving fails the change is undone.
    pub async fn update<R>(&mut self, change: impl FnOnce(&mut Self) -> R) -> Result<R> {
        let _lock = self.lock().await?;
        self.reload().await?;

        let before = self.doc.clone();
        let out = change(self);
        if let Err(e) = self.save().await {
            self.doc = before;
            return Err(e);
        }

        Ok(out)
    }

    /// Re-read the document; a missing file is an empty table
    pub async fn reload(&mut self) -> Result<()> {
        self.doc = match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice::<TableDocument>(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => TableDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(())
    }

    /// Write the table to disk atomically. Callers other than [`Self::update`]
    /// must make sure no other process writes the table concurrently.
    pub async fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.doc)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let tmp = sibling(&self.path, "tmp");
        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn requeue_abandoned(&mut self) -> Result<()> {
        let _lock = self.lock().await?;
        self.reload().await?;

        let now = Utc::now();
        let mut recovered = 0;
        for job in self.doc.jobs.iter_mut().filter(|j| j.state == JobState::Running) {
            job.state = JobState::Enqueued;
            job.next_due = now;
            recovered += 1;
        }

        if recovered > 0 {
            warn!(recovered, "Re-queued jobs interrupted by a previous shutdown");
            self.save().await?;
        }
        Ok(())
    }

    /// Exclusive writer lock; released when the returned file is dropped
    async fn lock(&self) -> Result<File> {
        let lock_path = sibling(&self.path, "lock");
        blocking(move || {
            let file = open_lock_file(&lock_path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
    }
}

/// `<path>.<suffix>` next to the table file
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

/// File locking blocks, so it stays off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let out = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn payload() -> PurgePayload {
        PurgePayload {
            directory: "/tmp/cache".to_string(),
        }
    }

    const PERIODIC: JobKind = JobKind::Periodic { interval_secs: 900 };

    fn detached() -> JobTable {
        JobTable {
            path: PathBuf::from("unused.json"),
            doc: TableDocument::default(),
            _owner: None,
        }
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let table = JobTable::open(dir.path().join("jobs.json")).await.unwrap();
        assert!(table.jobs().is_empty());
        assert!(table.next_due().is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(JobTable::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("jobs.json");
        let now = Utc::now();

        let mut table = JobTable::open(&path).await.unwrap();
        let id = table.insert(PERIODIC, Some("k".to_string()), payload(), now, now);
        table.insert(JobKind::OneTime, None, payload(), now, now);
        table.save().await.unwrap();

        let reloaded = JobTable::open(&path).await.unwrap();
        assert_eq!(reloaded.jobs().len(), 2);
        assert_eq!(reloaded.find_unique("k").map(|j| j.id), Some(id));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_ids_are_not_reused_after_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let now = Utc::now();

        let mut table = JobTable::open(&path).await.unwrap();
        let first = table.insert(JobKind::OneTime, None, payload(), now, now);
        table.save().await.unwrap();

        let mut table = JobTable::open(&path).await.unwrap();
        let second = table.insert(JobKind::OneTime, None, payload(), now, now);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_running_jobs_are_requeued_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let now = Utc::now();

        let mut table = JobTable::open(&path).await.unwrap();
        let id = table.insert(PERIODIC, None, payload(), now, now);
        assert_eq!(table.claim_due(now).len(), 1);
        table.save().await.unwrap();
        drop(table);

        let table = JobTable::open(&path).await.unwrap();
        let job = table.get(id).unwrap();
        assert_eq!(job.state, JobState::Enqueued);
        assert!(job.next_due <= Utc::now());
    }

    #[test]
    fn test_claim_only_due_jobs_once() {
        let now = Utc::now();
        let mut table = detached();
        let due = table.insert(JobKind::OneTime, None, payload(), now, now);
        table.insert(
            JobKind::OneTime,
            None,
            payload(),
            now + chrono::Duration::minutes(5),
            now,
        );

        let claimed = table.claim_due(now);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due);
        assert_eq!(claimed[0].state, JobState::Running);

        // a claimed job is not handed out twice
        assert!(table.claim_due(now).is_empty());
    }

    #[test]
    fn test_complete_periodic_success_and_failure() {
        let now = Utc::now();
        let mut table = detached();
        let id = table.insert(PERIODIC, None, payload(), now, now);

        table.claim_due(now);
        table.complete(id, Err("boom".to_string()), now);
        let job = table.get(id).unwrap();
        assert_eq!(job.state, JobState::Enqueued);
        assert_eq!(job.failures, 1);
        assert_eq!(job.next_due, now + chrono::Duration::seconds(10));
        assert_eq!(job.last_error.as_deref(), Some("boom"));

        table.claim_due(job.next_due);
        table.complete(id, Err("boom".to_string()), now);
        assert_eq!(
            table.get(id).unwrap().next_due,
            now + chrono::Duration::seconds(20)
        );

        table.claim_due(now + chrono::Duration::seconds(20));
        table.complete(id, Ok(()), now);
        let job = table.get(id).unwrap();
        assert_eq!(job.failures, 0);
        assert!(job.last_error.is_none());
        assert_eq!(job.next_due, now + chrono::Duration::seconds(900));
    }

    #[test]
    fn test_complete_one_time_is_terminal() {
        let now = Utc::now();
        let mut table = detached();
        let ok = table.insert(JobKind::OneTime, None, payload(), now, now);
        let failed = table.insert(JobKind::OneTime, None, payload(), now, now);
        table.claim_due(now);
        table.complete(ok, Ok(()), now);
        table.complete(failed, Err("denied".to_string()), now);

        assert_eq!(table.get(ok).unwrap().state, JobState::Succeeded);
        assert_eq!(table.get(failed).unwrap().state, JobState::Failed);
        assert!(table.claim_due(now + chrono::Duration::days(1)).is_empty());
        assert!(table.next_due().is_none());
    }

    #[test]
    fn test_prune_finished_jobs() {
        let now = Utc::now();
        let mut table = detached();
        let old = table.insert(JobKind::OneTime, None, payload(), now, now);
        let periodic = table.insert(PERIODIC, None, payload(), now, now);
        table.claim_due(now);
        table.complete(old, Ok(()), now);
        table.complete(periodic, Ok(()), now);

        assert_eq!(table.prune(now + chrono::Duration::hours(1)), 0);
        assert_eq!(table.prune(now + chrono::Duration::days(2)), 1);
        assert!(table.get(old).is_none());
        assert!(table.get(periodic).is_some());
    }

    #[test]
    fn test_remove_unique() {
        let now = Utc::now();
        let mut table = detached();
        table.insert(PERIODIC, Some("k".to_string()), payload(), now, now);
        assert!(table.remove_unique("k"));
        assert!(!table.remove_unique("k"));
        assert!(table.find_unique("k").is_none());
    }

    #[tokio::test]
    async fn test_updates_from_two_tables_are_merged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let now = Utc::now();

        let mut a = JobTable::open(&path).await.unwrap();
        let mut b = JobTable::open(&path).await.unwrap();

        let first = a
            .update(|t| t.insert(PERIODIC, Some("k".to_string()), payload(), now, now))
            .await
            .unwrap();
        let second = b
            .update(|t| t.insert(JobKind::OneTime, None, payload(), now, now))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(b.jobs().len(), 2);

        drop(a);
        drop(b);
        let reloaded = JobTable::open(&path).await.unwrap();
        assert_eq!(reloaded.jobs().len(), 2);
        assert_eq!(reloaded.find_unique("k").map(|j| j.id), Some(first));
    }

    #[tokio::test]
    async fn test_running_jobs_of_live_table_are_left_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let now = Utc::now();

        let mut a = JobTable::open(&path).await.unwrap();
        let id = a
            .update(|t| {
                let id = t.insert(JobKind::OneTime, None, payload(), now, now);
                t.claim_due(now);
                id
            })
            .await
            .unwrap();

        let mut b = JobTable::open(&path).await.unwrap();
        assert_eq!(b.get(id).unwrap().state, JobState::Running);
        assert!(b.update(|t| t.claim_due(now)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_is_undone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let now = Utc::now();
        let mut table = JobTable::open(&path).await.unwrap();

        // a directory in the way of the temp file makes the save fail
        std::fs::create_dir(dir.path().join("jobs.json.tmp")).unwrap();
        let result = table
            .update(|t| t.insert(JobKind::OneTime, None, payload(), now, now))
            .await;

        assert!(result.is_err());
        assert!(table.jobs().is_empty());
    }
}
