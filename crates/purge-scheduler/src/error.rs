//! Error types for cleanup scheduling and purging

use std::fmt;

#[derive(Debug)]
pub enum SchedulerError {
    /// Invalid registration (interval below the minimum, or too large)
    Config(String),
    Io(Box<std::io::Error>),
    Serialization(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SchedulerError::Io(err) => write!(f, "IO error: {}", err),
            SchedulerError::Serialization(msg) => write!(f, "Job table error: {}", msg),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why a purge could not start at all
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeError {
    /// The payload no longer names a writable directory
    InvalidDirectory(String),
    /// The blocking purge task did not complete
    Aborted(String),
}

impl fmt::Display for PurgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurgeError::InvalidDirectory(msg) => write!(f, "Invalid purge directory: {}", msg),
            PurgeError::Aborted(msg) => write!(f, "Purge aborted: {}", msg),
        }
    }
}

impl std::error::Error for PurgeError {}
