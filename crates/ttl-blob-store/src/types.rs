//! Cache types

use serde::{Deserialize, Serialize};

/// Statistics about the cache
///
/// `entries` and `total_size` come from a directory scan at the time of the
/// call; the counters cover the lifetime of the `CacheStore`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub write_failures: u64,
}
