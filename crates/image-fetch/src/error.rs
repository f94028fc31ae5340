//! Error types for image fetching

use std::fmt;

/// Network download failure
#[derive(Debug)]
pub enum FetchError {
    InvalidIdentifier(String),
    Http(Box<reqwest::Error>),
    /// Non-2xx response
    Status(u16),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::InvalidIdentifier(msg) => write!(f, "Invalid identifier: {}", msg),
            FetchError::Http(err) => write!(f, "HTTP error: {}", err),
            FetchError::Status(status) => write!(f, "Server returned status {}", status),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(Box::new(err))
    }
}

/// Image bytes could not be turned into an image, or back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Decode(String),
    Encode(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Decode(msg) => write!(f, "Decode error: {}", msg),
            CodecError::Encode(msg) => write!(f, "Encode error: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

/// Pipeline could not be assembled
#[derive(Debug)]
pub enum PipelineError {
    /// Built outside a tokio runtime without an explicit handle
    NoRuntime,
    Fetcher(FetchError),
    Delivery(Box<std::io::Error>),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::NoRuntime => write!(f, "No tokio runtime available"),
            PipelineError::Fetcher(err) => write!(f, "Fetcher setup failed: {}", err),
            PipelineError::Delivery(err) => write!(f, "Delivery thread failed to start: {}", err),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Fetcher(err) => Some(err),
            PipelineError::Delivery(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        PipelineError::Fetcher(err)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Delivery(Box::new(err))
    }
}
