//! Directory purge worker
//!
//! Empties a directory named by a [`PurgePayload`]. The purge is not
//! transactional: every entry is attempted, a single failure fails the run,
//! and whatever was already deleted stays deleted.

use crate::error::PurgeError;
use crate::types::PurgePayload;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use ttl_blob_store::CacheDirectory;

/// Removes a single directory entry
pub trait EntryRemover: Send + Sync {
    fn remove(&self, path: &Path, is_dir: bool) -> io::Result<()>;
}

/// Deletes straight from the filesystem, recursing into sub-trees
pub struct FsRemover;

impl EntryRemover for FsRemover {
    fn remove(&self, path: &Path, is_dir: bool) -> io::Result<()> {
        if is_dir {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Aggregate result of one purge run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub removed: usize,
    pub failures: Vec<PurgeFailure>,
}

impl PurgeReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// One-line summary, used as the job's recorded error
    pub fn summary(&self) -> String {
        match self.failures.first() {
            None => format!("removed {} entries", self.removed),
            Some(first) => format!(
                "removed {} entries, {} failed (first: {}: {})",
                self.removed,
                self.failures.len(),
                first.path.display(),
                first.reason
            ),
        }
    }
}

#[derive(Clone)]
pub struct PurgeWorker {
    remover: Arc<dyn EntryRemover>,
}

impl PurgeWorker {
    pub fn new() -> Self {
        Self::with_remover(Arc::new(FsRemover))
    }

    pub fn with_remover(remover: Arc<dyn EntryRemover>) -> Self {
        Self { remover }
    }

    /// Purge the payload's directory.
    ///
    /// The directory is validated again here since the job may run long
    /// after it was scheduled.
    pub async fn run(&self, payload: &PurgePayload) -> Result<PurgeReport, PurgeError> {
        let requested = payload.path();
        if !requested.is_absolute() {
            return Err(PurgeError::InvalidDirectory(format!(
                "{} is not an absolute path",
                payload.directory
            )));
        }

        let remover = self.remover.clone();
        let report = tokio::task::spawn_blocking(move || -> Result<PurgeReport, PurgeError> {
            // the directory may have changed since the job was scheduled
            let directory = CacheDirectory::new(&requested)
                .map_err(|e| PurgeError::InvalidDirectory(e.to_string()))?;
            Ok(purge_entries(&directory, remover.as_ref()))
        })
        .await
        .map_err(|e| PurgeError::Aborted(e.to_string()))??;

        if report.is_success() {
            info!(
                directory = %payload.directory,
                removed = report.removed,
                "Purged cache directory"
            );
        } else {
            warn!(
                directory = %payload.directory,
                removed = report.removed,
                failed = report.failures.len(),
                "Purge completed with failures"
            );
        }

        Ok(report)
    }
}

impl Default for PurgeWorker {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_entries(directory: &CacheDirectory, remover: &dyn EntryRemover) -> PurgeReport {
    let mut report = PurgeReport::default();

    let entries = match std::fs::read_dir(directory.path()) {
        Ok(entries) => entries,
        Err(e) => {
            report.failures.push(PurgeFailure {
                path: directory.path().to_path_buf(),
                reason: e.to_string(),
            });
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.failures.push(PurgeFailure {
                    path: directory.path().to_path_buf(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let path = entry.path();
        // file_type does not follow symlinks, so a link to a directory is
        // unlinked rather than emptied
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

        match remover.remove(&path, is_dir) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed cache entry");
                report.removed += 1;
            }
            // already gone, e.g. a temporary file renamed by a concurrent write
            Err(e) if e.kind() == io::ErrorKind::NotFound => report.removed += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove cache entry");
                report.failures.push(PurgeFailure {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Refuses to delete one file name, deletes everything else
    struct DenyOne(&'static str);

    impl EntryRemover for DenyOne {
        fn remove(&self, path: &Path, is_dir: bool) -> io::Result<()> {
            if path.file_name().and_then(|n| n.to_str()) == Some(self.0) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            FsRemover.remove(path, is_dir)
        }
    }

    fn payload_for(path: &Path) -> PurgePayload {
        PurgePayload::for_directory(&CacheDirectory::new(path).unwrap())
    }

    fn populate(dir: &Path, files: usize) {
        for i in 0..files {
            std::fs::write(dir.join(format!("file{}", i)), b"data").unwrap();
        }
    }

    #[tokio::test]
    async fn test_purge_removes_everything() {
        let dir = tempdir().unwrap();
        populate(dir.path(), 5);
        let nested = dir.path().join("sub").join("deeper");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("inner"), b"data").unwrap();

        let report = PurgeWorker::new().run(&payload_for(dir.path())).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.removed, 6);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        // the directory itself survives
        assert!(dir.path().is_dir());
    }

    #[tokio::test]
    async fn test_purge_empty_directory() {
        let dir = tempdir().unwrap();
        let report = PurgeWorker::new().run(&payload_for(dir.path())).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.removed, 0);
    }

    #[tokio::test]
    async fn test_denied_deletion_fails_run_but_keeps_progress() {
        let dir = tempdir().unwrap();
        populate(dir.path(), 4);

        let worker = PurgeWorker::with_remover(Arc::new(DenyOne("file2")));
        let report = worker.run(&payload_for(dir.path())).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.removed, 3);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("file2"));
        assert!(report.summary().contains("1 failed"));

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(remaining, vec![std::ffi::OsString::from("file2")]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let payload = payload_for(dir.path());
        drop(dir);

        let err = PurgeWorker::new().run(&payload).await.unwrap_err();
        assert!(matches!(err, PurgeError::InvalidDirectory(_)));
    }

    #[tokio::test]
    async fn test_relative_path_is_rejected() {
        let payload = PurgePayload {
            directory: "relative/cache".to_string(),
        };
        let err = PurgeWorker::new().run(&payload).await.unwrap_err();
        assert!(err.to_string().contains("not an absolute path"));
    }

    #[tokio::test]
    async fn test_file_instead_of_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        let payload = PurgePayload {
            directory: file.to_string_lossy().into_owned(),
        };
        let err = PurgeWorker::new().run(&payload).await.unwrap_err();
        assert!(matches!(err, PurgeError::InvalidDirectory(_)));
        assert!(file.exists());
    }

    /// Only removes entries once the runtime thread has made progress
    struct AwaitRuntime(std::sync::Mutex<std::sync::mpsc::Receiver<()>>);

    impl EntryRemover for AwaitRuntime {
        fn remove(&self, path: &Path, is_dir: bool) -> io::Result<()> {
            let rx = self.0.lock().unwrap();
            rx.recv_timeout(std::time::Duration::from_secs(5))
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "runtime blocked"))?;
            FsRemover.remove(path, is_dir)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_purge_does_not_block_runtime_thread() {
        let dir = tempdir().unwrap();
        populate(dir.path(), 1);

        let (tx, rx) = std::sync::mpsc::channel();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            tx.send(()).unwrap();
        });

        let worker = PurgeWorker::with_remover(Arc::new(AwaitRuntime(std::sync::Mutex::new(rx))));
        let report = worker.run(&payload_for(dir.path())).await.unwrap();

        assert!(report.is_success(), "{}", report.summary());
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn test_summary_on_success() {
        let report = PurgeReport {
            removed: 3,
            failures: Vec::new(),
        };
        assert_eq!(report.summary(), "removed 3 entries");
    }
}
