//! Operator Prompt Abstraction
//!
//! The device-code flow needs to show the operator a short user code and a
//! verification address. How that is shown is up to the host.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// What the operator needs to complete a device-code sign-in elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChallenge {
    pub user_code: String,
    pub verification_uri: String,
    /// Provider supplied text, usually "To sign in, use a web browser to open ..."
    pub message: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Verification prompt trait
///
/// Called exactly once per issued device challenge.
#[async_trait]
pub trait VerificationPrompt: Send + Sync {
    async fn show_challenge(&self, challenge: &DeviceChallenge) -> Result<()>;
}
