use crate::error::Result;
use async_trait::async_trait;

/// Source of bearer tokens for outbound repository calls.
///
/// Implementors must always hand out a current token; callers never cache it.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// A token valid for at least the next few minutes.
    async fn access_token(&self) -> Result<String>;

    /// Called once after the service answered 401 for `rejected_token`.
    async fn refresh_after_rejection(&self, rejected_token: &str) -> Result<String>;
}
