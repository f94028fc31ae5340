//! Durable, backoff-aware scheduling of cache directory purges
//!
//! [`CleanupScheduler`] records periodic (one per directory) and one-time
//! purge jobs in a JSON job table that survives restarts. [`JobRunner`]
//! claims due jobs from that table and hands each one to a [`PurgeWorker`],
//! which empties the directory named in the job's payload.

pub mod error;
pub mod policy;
mod runner;
mod scheduler;
mod table;
pub mod types;
mod worker;

pub use error::{PurgeError, Result, SchedulerError};
pub use policy::{MAX_BACKOFF, MIN_BACKOFF, MIN_PERIODIC_INTERVAL};
pub use runner::{JobOutcome, JobRunner};
pub use scheduler::{CleanupScheduler, Registration};
pub use table::JobTable;
pub use types::{JobId, JobKind, JobRecord, JobState, PurgePayload};
pub use worker::{EntryRemover, FsRemover, PurgeFailure, PurgeReport, PurgeWorker};
