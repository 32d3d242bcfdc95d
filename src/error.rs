use std::io;

use thiserror::Error;

// Error modules
pub mod classified;
pub mod handler;
pub mod normalizer;
pub mod response;
pub mod taxonomy;

pub use classified::{ClassifiedError, ClassifiedErrorBuilder, ErrorContext};
pub use handler::{ErrorHandler, RequestMeta};
pub use normalizer::{RaisedFailure, ValidationIssue, normalize};
pub use response::ErrorResponse;
pub use taxonomy::{ErrorCategory, ErrorSeverity};

macro_rules! from_err {
    ($err:ty, $enum:expr) => {
        impl From<$err> for AppError {
            fn from(e: $err) -> Self {
                $enum(e)
            }
        }
    };
}

/// Failures of the pipeline itself.
///
/// These never reach the caller whose request raised the original failure; the handler
/// logs them and carries on.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("SQLx error: {0}")]
    SqlxError(sqlx::Error),
    #[error("Invalid JSON payload: {0}")]
    JsonError(serde_json::Error),
    #[error("IO error: {0}")]
    IoError(io::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Logger error: {0}")]
    LoggerError(String),
    #[error("Escalation error: {0}")]
    EscalationError(String),
    #[error("{count} log entries could not be flushed: {reason}")]
    UnflushedEntries { count: usize, reason: String },
}

from_err!(sqlx::Error, AppError::SqlxError);
from_err!(serde_json::Error, AppError::JsonError);
from_err!(io::Error, AppError::IoError);

impl AppError {
    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError(message.into())
    }

    /// Create a new logger error
    pub fn logger(message: impl Into<String>) -> Self {
        Self::LoggerError(message.into())
    }

    /// Create a new escalation error
    pub fn escalation(message: impl Into<String>) -> Self {
        Self::EscalationError(message.into())
    }
}

pub type Result<T, E = AppError> = core::result::Result<T, E>;
