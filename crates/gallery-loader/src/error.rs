//! Error types for the gallery loader

use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Cache(ttl_blob_store::CacheError),
    Scheduler(purge_scheduler::SchedulerError),
    Pipeline(image_fetch::PipelineError),
    Io(Box<std::io::Error>),
    Serialization(String),
    Config(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Cache(err) => write!(f, "Cache error: {}", err),
            AppError::Scheduler(err) => write!(f, "Scheduler error: {}", err),
            AppError::Pipeline(err) => write!(f, "Pipeline error: {}", err),
            AppError::Io(err) => write!(f, "IO error: {}", err),
            AppError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Cache(err) => Some(err),
            AppError::Scheduler(err) => Some(err),
            AppError::Pipeline(err) => Some(err),
            AppError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<ttl_blob_store::CacheError> for AppError {
    fn from(err: ttl_blob_store::CacheError) -> Self {
        AppError::Cache(err)
    }
}

impl From<purge_scheduler::SchedulerError> for AppError {
    fn from(err: purge_scheduler::SchedulerError) -> Self {
        AppError::Scheduler(err)
    }
}

impl From<image_fetch::PipelineError> for AppError {
    fn from(err: image_fetch::PipelineError) -> Self {
        AppError::Pipeline(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<tracing_subscriber::filter::ParseError> for AppError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        AppError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
