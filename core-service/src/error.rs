use core_auth::AuthError;
use core_publish::{ErrorKind, PublishError};
use provider_sharepoint::GraphError;
use thiserror::Error;

/// Process exit codes shared by every front end.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const PARTIAL_FAILURE: i32 = 1;
    pub const CONFIGURATION: i32 = 2;
    pub const AUTHENTICATION: i32 = 3;
    pub const FATAL: i32 = 4;
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Repository error: {0}")]
    Repository(#[from] GraphError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },
}

impl ServiceError {
    /// Taxonomy bucket of the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Config(core_runtime::Error::Io(_)) => ErrorKind::Io,
            ServiceError::Config(_) => ErrorKind::Configuration,
            ServiceError::Auth(_) => ErrorKind::Authentication,
            ServiceError::Repository(GraphError::Auth(_))
            | ServiceError::Repository(GraphError::Unauthorized(_)) => ErrorKind::Authentication,
            ServiceError::Repository(GraphError::InvalidAddress(_)) => ErrorKind::Configuration,
            ServiceError::Repository(GraphError::NotFound { .. }) => ErrorKind::NotFound,
            ServiceError::Repository(_) => ErrorKind::Remote,
            ServiceError::Publish(e) => e.kind(),
            ServiceError::CapabilityMissing { .. } => ErrorKind::Internal,
        }
    }

    /// `2` configuration, `3` authentication, `4` anything else.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => exit_code::CONFIGURATION,
            ErrorKind::Authentication => exit_code::AUTHENTICATION,
            _ => exit_code::FATAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
