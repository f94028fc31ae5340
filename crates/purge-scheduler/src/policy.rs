//! Scheduling policy constants and the retry backoff curve

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Shortest accepted interval for a periodic cleanup
pub const MIN_PERIODIC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// First retry delay after a failed periodic run
pub const MIN_BACKOFF: Duration = Duration::from_secs(10);

/// Retry delays never grow past this
pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60 * 60);

/// Finished one-time jobs stay inspectable for this long
pub const FINISHED_JOB_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Exponential backoff: `MIN_BACKOFF * 2^(failures - 1)`, capped at `MAX_BACKOFF`
pub fn backoff_delay(failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.checked_pow(failures - 1).unwrap_or(u32::MAX);
    MIN_BACKOFF
        .checked_mul(factor)
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}

/// `now + delay`, saturating at the largest representable time
pub fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
