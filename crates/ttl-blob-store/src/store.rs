//! File-based blob store with read-time freshness

use crate::directory::CacheDirectory;
use crate::error::Result;
use crate::types::CacheStats;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, warn};

/// Keyed, TTL-aware access to a single cache directory
pub struct CacheStore {
    directory: CacheDirectory,
    /// Suffix source for temporary files so concurrent writers never share one
    write_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    write_failures: AtomicU64,
}

impl CacheStore {
    /// Open a store over `path`, failing with a configuration error if the
    /// directory is missing, not a directory, or not writable
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_directory(CacheDirectory::new(path)?))
    }

    pub fn with_directory(directory: CacheDirectory) -> Self {
        Self {
            directory,
            write_seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    pub fn directory(&self) -> &CacheDirectory {
        &self.directory
    }

    /// Derive the cache key for a resource identifier (hex SHA-256)
    pub fn cache_key(identifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Return the entry's bytes if its file exists and is younger than `ttl`.
    ///
    /// Missing, stale and unreadable entries all come back as `None`. A stale
    /// file is left where it is.
    pub async fn get(&self, key: &str, ttl: Duration) -> Option<Vec<u8>> {
        if !is_valid_key(key) {
            warn!(key = %key, "Rejected invalid cache key");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let path = self.directory.entry_path(key);

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                warn!(key = %key, "Cache entry is not a regular file");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to stat cache entry");
                }
                debug!(key = %key, "Cache miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let age = match metadata.modified() {
            Ok(modified) => entry_age(modified, SystemTime::now()),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache entry has no modification time");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if age >= ttl {
            debug!(
                key = %key,
                age_secs = age.as_secs(),
                ttl_secs = ttl.as_secs(),
                "Cache entry stale"
            );
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match fs::read(&path).await {
            Ok(data) => {
                debug!(key = %key, size = data.len(), "Cache hit");
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cached file");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write or replace the entry for `key`.
    ///
    /// The bytes land in a temporary file first and are renamed over the
    /// entry, so readers see either the old or the new content. A failed
    /// write is logged and becomes a future miss.
    pub async fn put(&self, key: &str, data: &[u8]) {
        if !is_valid_key(key) {
            warn!(key = %key, "Refused to cache under invalid key");
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if let Err(e) = self.write_atomic(key, data).await {
            warn!(key = %key, error = %e, "Failed to cache entry");
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }

        debug!(key = %key, size = data.len(), "Cached entry");
    }

    async fn write_atomic(&self, key: &str, data: &[u8]) -> std::io::Result<()> {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .directory
            .entry_path(&format!(".{}.{}.{}.tmp", key, std::process::id(), seq));

        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp, self.directory.entry_path(key)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        Ok(())
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let mut entries = 0;
        let mut total_size = 0;

        match fs::read_dir(self.directory.path()).await {
            Ok(mut dir) => loop {
                match dir.next_entry().await {
                    Ok(Some(entry)) => {
                        if entry.file_name().to_string_lossy().starts_with('.') {
                            continue;
                        }
                        if let Ok(metadata) = entry.metadata().await {
                            if metadata.is_file() {
                                entries += 1;
                                total_size += metadata.len();
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to scan cache directory");
                        break;
                    }
                }
            },
            Err(e) => warn!(error = %e, "Failed to open cache directory"),
        }

        CacheStats {
            entries,
            total_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// A key must name a single visible file inside the directory.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key.contains('/')
        && !key.contains('\\')
        && !key.contains('\0')
}

/// Files stamped in the future count as brand new.
fn entry_age(modified: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or(Duration::ZERO)
}
