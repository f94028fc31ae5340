//! Directory-backed blob store with read-time TTL freshness
//!
//! Every entry is one file named by its cache key inside a single validated
//! directory. Nothing about an entry is kept in memory: freshness is decided
//! when the entry is read, from the file's modification time and the TTL the
//! caller passes in. Stale files are left on disk for a purge to reclaim.

mod directory;
mod error;
mod store;
mod types;

pub use directory::CacheDirectory;
pub use error::{CacheError, Result};
pub use store::CacheStore;
pub use types::CacheStats;
