use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminant used for exit codes, summaries and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Authentication,
    TransientNetwork,
    Throttling,
    NotFound,
    Remote,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Throttling => "throttling",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Remote => "remote",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Throttled by the repository: {message}")]
    Throttled {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Repository error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Upload incomplete: {0}")]
    IncompleteUpload(String),

    #[error("Invalid job transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::Configuration(_) | PublishError::InvalidPath { .. } => {
                ErrorKind::Configuration
            }
            PublishError::Authentication(_) => ErrorKind::Authentication,
            PublishError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            PublishError::Throttled { .. } => ErrorKind::Throttling,
            PublishError::NotFound { .. } => ErrorKind::NotFound,
            PublishError::Remote { .. } | PublishError::IncompleteUpload(_) => ErrorKind::Remote,
            PublishError::Io(_) => ErrorKind::Io,
            PublishError::InvalidStateTransition { .. } | PublishError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        PublishError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<core_runtime::Error> for PublishError {
    fn from(err: core_runtime::Error) -> Self {
        match err {
            core_runtime::Error::Io(e) => PublishError::Io(e),
            other => PublishError::Configuration(other.to_string()),
        }
    }
}

impl From<walkdir::Error> for PublishError {
    fn from(err: walkdir::Error) -> Self {
        let message = err.to_string();
        match err.into_io_error() {
            Some(io) => PublishError::Io(io),
            None => PublishError::Internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, PublishError>;
