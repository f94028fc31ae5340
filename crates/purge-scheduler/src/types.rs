//! Job records and their payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use ttl_blob_store::CacheDirectory;

pub type JobId = u64;

/// The whole contract between the scheduler and the purge worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgePayload {
    /// Absolute path of the directory to empty
    pub directory: String,
}

impl PurgePayload {
    pub fn for_directory(directory: &CacheDirectory) -> Self {
        Self {
            directory: directory.identity(),
        }
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.directory)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    Periodic { interval_secs: u64 },
    OneTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for `next_due`
    Enqueued,
    /// Claimed by a runner
    Running,
    /// One-time job finished cleanly (terminal)
    Succeeded,
    /// One-time job failed (terminal)
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// A persisted job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    /// Set for periodic jobs; at most one live job per key
    pub unique_key: Option<String>,
    pub payload: PurgePayload,
    pub state: JobState,
    pub next_due: DateTime<Utc>,
    /// Consecutive failed runs, drives the backoff delay
    pub failures: u32,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Enqueued && self.next_due <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: JobState) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            id: 1,
            kind: JobKind::Periodic { interval_secs: 900 },
            unique_key: Some("periodic-cleanup:/tmp/cache".to_string()),
            payload: PurgePayload {
                directory: "/tmp/cache".to_string(),
            },
            state,
            next_due: now,
            failures: 0,
            created_at: now,
            last_run: None,
            last_error: None,
        }
    }

    #[test]
    fn test_payload_serializes_as_single_field() {
        let payload = PurgePayload {
            directory: "/var/cache/images".to_string(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"directory":"/var/cache/images"}"#);
    }

    #[test]
    fn test_job_kind_serialization() {
        let json = serde_json::to_string(&JobKind::Periodic { interval_secs: 900 }).unwrap();
        assert_eq!(json, r#"{"type":"periodic","interval_secs":900}"#);
        let json = serde_json::to_string(&JobKind::OneTime).unwrap();
        assert_eq!(json, r#"{"type":"one_time"}"#);
    }

    #[test]
    fn test_is_due() {
        let job = record(JobState::Enqueued);
        assert!(job.is_due(job.next_due));
        assert!(!job.is_due(job.next_due - chrono::Duration::seconds(1)));
        assert!(!record(JobState::Running).is_due(Utc::now()));
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Enqueued.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_record_round_trip() {
        let job = record(JobState::Enqueued);
        let json = serde_json::to_string(&job).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
