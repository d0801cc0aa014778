use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("The user declined the sign-in request")]
    AuthorizationDeclined,

    #[error("The device code expired before sign-in completed; run the sign-in again")]
    DeviceCodeExpired,

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Interactive sign-in required")]
    InteractionRequired,

    #[error("Authentication method not supported: {0}")]
    UnsupportedMethod(String),

    #[error("Network error during authentication: {0}")]
    NetworkError(String),

    #[error("Token cache error: {0}")]
    Cache(String),

    #[error("Operation timed out: {operation}")]
    OperationTimeout { operation: String },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("{0}")]
    Other(String),
}

impl From<bridge_traits::BridgeError> for AuthError {
    fn from(err: bridge_traits::BridgeError) -> Self {
        AuthError::NetworkError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
