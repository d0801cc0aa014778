//! Credential Cache Abstraction
//!
//! Persistent storage for the serialized authentication session cache.
//! The core owns the document format; hosts only move opaque bytes.

use async_trait::async_trait;

use crate::error::Result;

/// Credential cache trait
///
/// Abstracts where the token cache document lives:
/// - Desktop: a file under the user's config directory with owner-only permissions
/// - Tests: an in-memory buffer
///
/// # Security
///
/// Implementations must:
/// - Restrict access to the current user
/// - Never log the stored bytes
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::CredentialCache;
///
/// async fn wipe(cache: &dyn CredentialCache) -> Result<()> {
///     cache.clear().await
/// }
/// ```
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Read the whole cache document
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if nothing has been stored yet.
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the whole cache document
    async fn store(&self, data: &[u8]) -> Result<()>;

    /// Delete the cache document. Deleting a missing document succeeds.
    async fn clear(&self) -> Result<()>;

    /// Human readable location, used in status output and logs
    fn location(&self) -> String;
}
