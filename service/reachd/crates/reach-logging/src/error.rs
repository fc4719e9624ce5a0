//! Error types for Reach logging infrastructure

use thiserror::Error;

/// Result type for logging operations
pub type LoggingResult<T> = Result<T, LoggingError>;

/// Errors that can occur while setting up logging
#[derive(Error, Debug)]
pub enum LoggingError {
    /// Log sink (file) could not be opened
    #[error("log sink error: {0}")]
    Sink(String),

    /// Invalid filter expression
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// Generic error
    #[error("logging error: {0}")]
    Generic(String),
}

impl From<&str> for LoggingError {
    fn from(s: &str) -> Self {
        LoggingError::Generic(s.to_string())
    }
}

impl From<String> for LoggingError {
    fn from(s: String) -> Self {
        LoggingError::Generic(s)
    }
}
