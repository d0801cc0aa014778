//! Error types for the SharePoint provider

use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use core_publish::PublishError;
use thiserror::Error;

/// Microsoft Graph errors
#[derive(Error, Debug)]
pub enum GraphError {
    /// Could not obtain or renew an access token
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The service rejected a freshly renewed token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Still throttled after the transport's own retries
    #[error("Throttled by Microsoft Graph (status {status_code})")]
    Throttled {
        status_code: u16,
        retry_after_seconds: Option<u64>,
    },

    #[error("Microsoft Graph error (status {status_code}): {message}")]
    Api { status_code: u16, message: String },

    #[error("Failed to parse Graph response: {0}")]
    Parse(String),

    /// The upload session ended without the final chunk yielding an item
    #[error("Upload incomplete: {0}")]
    IncompleteUpload(String),

    #[error("Invalid repository address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound { .. })
    }
}

impl From<GraphError> for PublishError {
    fn from(error: GraphError) -> Self {
        match error {
            GraphError::Auth(e) => PublishError::Authentication(e.to_string()),
            e @ (GraphError::Unauthorized(_) | GraphError::Forbidden(_)) => {
                PublishError::Authentication(e.to_string())
            }
            GraphError::NotFound { resource } => PublishError::NotFound { resource },
            GraphError::Conflict(message) => PublishError::Remote {
                status: 409,
                message,
            },
            GraphError::Throttled {
                status_code,
                retry_after_seconds,
            } => PublishError::Throttled {
                message: format!("Microsoft Graph answered {}", status_code),
                retry_after_seconds,
            },
            GraphError::Api {
                status_code,
                message,
            } if status_code >= 500 => {
                PublishError::TransientNetwork(format!("status {}: {}", status_code, message))
            }
            GraphError::Api {
                status_code,
                message,
            } => PublishError::Remote {
                status: status_code,
                message,
            },
            GraphError::Parse(message) => PublishError::Internal(message),
            GraphError::IncompleteUpload(message) => PublishError::IncompleteUpload(message),
            GraphError::InvalidAddress(message) => PublishError::Configuration(message),
            GraphError::Bridge(BridgeError::CircuitOpen(message)) => PublishError::Throttled {
                message,
                retry_after_seconds: None,
            },
            GraphError::Bridge(e) if e.is_transient() => PublishError::TransientNetwork(e.to_string()),
            GraphError::Bridge(BridgeError::Io(e)) => PublishError::Io(e),
            GraphError::Bridge(e) => PublishError::TransientNetwork(e.to_string()),
        }
    }
}
