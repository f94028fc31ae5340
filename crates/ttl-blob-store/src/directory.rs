//! Validated cache directory

use crate::error::{CacheError, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static PROBE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An absolute path to an existing, writable directory.
///
/// Construction is the only place the checks happen; holders of a
/// `CacheDirectory` may still find it gone later (a purge job re-validates
/// before touching it for exactly that reason).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheDirectory {
    path: PathBuf,
}

impl CacheDirectory {
    /// Validate `path` and resolve it to a canonical absolute path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let metadata = std::fs::metadata(path).map_err(|e| {
            CacheError::Config(format!("{} must be a directory: {}", path.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(CacheError::Config(format!(
                "{} must be a directory",
                path.display()
            )));
        }

        let path = path.canonicalize().map_err(|e| {
            CacheError::Config(format!("{} cannot be resolved: {}", path.display(), e))
        })?;

        if !is_writable(&path) {
            return Err(CacheError::Config(format!(
                "{} must be writable",
                path.display()
            )));
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable identity of the directory, used to key per-directory jobs
    pub fn identity(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Path of the file backing `key`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.path.join(key)
    }
}

/// Permission bits lie for privileged users, so actually try to create a file.
fn is_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(
        ".write-probe-{}-{}",
        std::process::id(),
        PROBE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
