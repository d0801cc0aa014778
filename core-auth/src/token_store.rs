//! Persistent Token Cache
//!
//! Persists authentication sessions through the host's
//! [`CredentialCache`](bridge_traits::storage::CredentialCache).
//!
//! ## Format
//!
//! One JSON document holds an entry per `(tenant, account)` pair. Storing a
//! session replaces the entry with the same pair; sessions for other tenants
//! or accounts are left untouched.
//!
//! ## Security
//!
//! - Token values are never logged
//! - A corrupt document is discarded rather than surfaced to callers

use crate::error::{AuthError, Result};
use crate::types::{AccountInfo, AuthSession};
use bridge_traits::storage::CredentialCache;
use chrono::{DateTime, Utc};
use core_runtime::logging::redact_if_sensitive;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CACHE_VERSION: u32 = 1;

/// Session cache over a host credential store.
#[derive(Clone)]
pub struct TokenCache {
    store: Arc<dyn CredentialCache>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheDocument {
    version: u32,
    #[serde(default)]
    entries: Vec<StoredSession>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    tenant_id: String,
    client_id: String,
    account: AccountInfo,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    stored_at: DateTime<Utc>,
}

impl std::fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSession")
            .field("tenant_id", &self.tenant_id)
            .field("account", &self.account.username)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl StoredSession {
    fn matches(&self, tenant_id: &str, username: &str) -> bool {
        self.tenant_id == tenant_id && self.account.username == username
    }
}

impl TokenCache {
    pub fn new(store: Arc<dyn CredentialCache>) -> Self {
        Self { store }
    }

    pub fn location(&self) -> String {
        self.store.location()
    }

    /// Most recently stored session for the tenant and client, if any.
    pub async fn load(&self, tenant_id: &str, client_id: &str) -> Result<Option<AuthSession>> {
        let document = self.read_document().await?;
        let location = self.location();

        let session = document
            .entries
            .into_iter()
            .filter(|e| e.tenant_id == tenant_id && e.client_id == client_id)
            .max_by_key(|e| e.stored_at)
            .map(|e| AuthSession {
                account: e.account,
                tenant_id: e.tenant_id,
                client_id: e.client_id,
                access_token: e.access_token,
                refresh_token: e.refresh_token,
                expires_at: e.expires_at,
                cache_location: Some(location.clone()),
            });

        if let Some(session) = &session {
            debug!(
                account = %redact_if_sensitive("account", &session.account.username),
                "Found cached session"
            );
        }
        Ok(session)
    }

    /// Insert or replace the entry for the session's `(tenant, account)` pair.
    pub async fn store(&self, session: &AuthSession) -> Result<()> {
        let mut document = self.read_document().await.unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable token cache");
            CacheDocument::default()
        });

        document
            .entries
            .retain(|e| !e.matches(&session.tenant_id, &session.account.username));
        document.entries.push(StoredSession {
            tenant_id: session.tenant_id.clone(),
            client_id: session.client_id.clone(),
            account: session.account.clone(),
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
            stored_at: Utc::now(),
        });

        self.write_document(&mut document).await?;
        info!(
            account = %redact_if_sensitive("account", &session.account.username),
            "Persisted session to token cache"
        );
        Ok(())
    }

    /// Remove every entry for the tenant and client, whichever account it
    /// belongs to. Deletes the whole document once it is empty.
    pub async fn remove_client(&self, tenant_id: &str, client_id: &str) -> Result<()> {
        let mut document = match self.read_document().await {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "Token cache unreadable, deleting it");
                return self.clear().await;
            }
        };

        document
            .entries
            .retain(|e| !(e.tenant_id == tenant_id && e.client_id == client_id));
        if document.entries.is_empty() {
            return self.clear().await;
        }
        self.write_document(&mut document).await
    }

    /// Delete the cache document.
    pub async fn clear(&self) -> Result<()> {
        self.store
            .clear()
            .await
            .map_err(|e| AuthError::Cache(e.to_string()))?;
        info!("Token cache deleted");
        Ok(())
    }

    async fn read_document(&self) -> Result<CacheDocument> {
        let bytes = self
            .store
            .load()
            .await
            .map_err(|e| AuthError::Cache(e.to_string()))?;

        match bytes {
            None => Ok(CacheDocument::default()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| AuthError::Cache(format!("corrupt token cache: {}", e))),
        }
    }

    async fn write_document(&self, document: &mut CacheDocument) -> Result<()> {
        document.version = CACHE_VERSION;
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| AuthError::Cache(format!("failed to serialise token cache: {}", e)))?;
        self.store
            .store(&bytes)
            .await
            .map_err(|e| AuthError::Cache(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryCache {
        data: Mutex<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl CredentialCache for MemoryCache {
        async fn load(&self) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.data.lock().unwrap().clone())
        }

        async fn store(&self, data: &[u8]) -> BridgeResult<()> {
            *self.data.lock().unwrap() = Some(data.to_vec());
            Ok(())
        }

        async fn clear(&self) -> BridgeResult<()> {
            *self.data.lock().unwrap() = None;
            Ok(())
        }

        fn location(&self) -> String {
            "memory".to_string()
        }
    }

    fn session(tenant: &str, user: &str, token: &str) -> AuthSession {
        client_session(tenant, user, "c1", token)
    }

    fn client_session(tenant: &str, user: &str, client: &str, token: &str) -> AuthSession {
        AuthSession {
            account: AccountInfo {
                username: user.to_string(),
                display_name: None,
                object_id: None,
                home_tenant_id: None,
            },
            tenant_id: tenant.to_string(),
            client_id: client.to_string(),
            access_token: token.to_string(),
            refresh_token: Some(format!("rt-{}", token)),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            cache_location: None,
        }
    }

    #[tokio::test]
    async fn test_store_replaces_same_tenant_and_account() {
        let backing = Arc::new(MemoryCache::default());
        let cache = TokenCache::new(backing.clone());

        cache.store(&session("t1", "ada", "one")).await.unwrap();
        cache.store(&session("t1", "ada", "two")).await.unwrap();
        cache.store(&session("t2", "ada", "other")).await.unwrap();

        let doc: CacheDocument =
            serde_json::from_slice(&backing.data.lock().unwrap().clone().unwrap()).unwrap();
        assert_eq!(doc.version, CACHE_VERSION);
        assert_eq!(doc.entries.len(), 2);

        let loaded = cache.load("t1", "c1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "two");
        assert_eq!(loaded.cache_location.as_deref(), Some("memory"));
    }

    #[tokio::test]
    async fn test_load_ignores_other_clients() {
        let cache = TokenCache::new(Arc::new(MemoryCache::default()));
        cache.store(&session("t1", "ada", "one")).await.unwrap();
        assert!(cache.load("t1", "another-client").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_client_keeps_other_clients() {
        let backing = Arc::new(MemoryCache::default());
        let cache = TokenCache::new(backing.clone());

        cache.store(&session("t1", "ada", "one")).await.unwrap();
        cache.store(&session("t1", "bob", "two")).await.unwrap();
        cache
            .store(&client_session("t1", "ada", "c2", "three"))
            .await
            .unwrap();

        cache.remove_client("t1", "c1").await.unwrap();
        assert!(cache.load("t1", "c1").await.unwrap().is_none());
        assert_eq!(
            cache.load("t1", "c2").await.unwrap().unwrap().access_token,
            "three"
        );

        cache.remove_client("t1", "c2").await.unwrap();
        assert!(backing.data.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_replaced_on_store() {
        let backing = Arc::new(MemoryCache::default());
        *backing.data.lock().unwrap() = Some(b"not json".to_vec());
        let cache = TokenCache::new(backing.clone());

        assert!(matches!(cache.load("t1", "c1").await, Err(AuthError::Cache(_))));

        cache.store(&session("t1", "ada", "fresh")).await.unwrap();
        assert_eq!(
            cache.load("t1", "c1").await.unwrap().unwrap().access_token,
            "fresh"
        );
    }
}
