//! # Authentication Session Manager
//!
//! Owns the authentication lifecycle for one repository connection.
//!
//! ## Overview
//!
//! [`AuthSessionManager`] is the only component that touches tokens. Every
//! other component asks it for a *current* token through
//! [`get_valid_access_token`](AuthSessionManager::get_valid_access_token) and
//! never caches one itself, so a refresh in the middle of a batch is
//! invisible to in-flight uploads.
//!
//! ## Acquisition order
//!
//! 1. In-memory session, if it is valid for at least five more minutes
//! 2. Session loaded from the token cache
//! 3. Refresh-token grant
//! 4. Client-credentials grant (application auth only)
//! 5. Device-code flow (interactive auth only, if fallback is allowed)
//!
//! ## Concurrency
//!
//! - Silent renewal is single-flight: one refresh lock, and callers re-check
//!   the session after acquiring it.
//! - The device-code flow is single-flight by generation: a caller that
//!   queued behind an in-flight flow returns that flow's session instead of
//!   issuing a second challenge.
//!
//! ## Usage
//!
//! ```ignore
//! use core_auth::{AuthSessionManager, AuthSettings};
//!
//! let manager = AuthSessionManager::new(
//!     AuthSettings::from_connection(&connection),
//!     http_client,
//!     credential_cache,
//!     prompt,
//! );
//! manager.load_cached_session().await;
//! let token = manager.get_valid_access_token().await?;
//! ```

use crate::device::{IdentityClient, TokenSet};
use crate::error::{AuthError, Result};
use crate::provider::AccessTokenProvider;
use crate::token_store::TokenCache;
use crate::types::{AccountInfo, AuthSession, AuthState, AuthStatus};
use async_trait::async_trait;
use bridge_traits::{
    http::HttpClient,
    prompt::{DeviceChallenge, VerificationPrompt},
    storage::CredentialCache,
    time::{Clock, SystemClock},
};
use chrono::Duration as ChronoDuration;
use core_runtime::config::{AuthMethod, CredentialMaterial, RepositoryConnection};
use core_runtime::logging::redact_if_sensitive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};

/// Timeout for a single silent renewal (refresh or client-credentials grant)
const SILENT_AUTH_TIMEOUT: Duration = Duration::from_secs(120);

/// Tokens expiring within this window are renewed before use
const TOKEN_REFRESH_BUFFER_SECS: i64 = 300;

/// Everything the manager needs to know about the connection.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub method: AuthMethod,
    pub tenant_id: String,
    pub client_id: String,
    pub credential: CredentialMaterial,
    pub authority: String,
    pub scopes: Vec<String>,
    /// Fall back to the device-code flow when silent acquisition fails
    pub allow_interactive: bool,
}

impl AuthSettings {
    pub fn from_connection(connection: &RepositoryConnection) -> Self {
        Self {
            method: connection.auth_method,
            tenant_id: connection.tenant_id.clone(),
            client_id: connection.client_id.clone(),
            credential: connection.credential.clone(),
            authority: connection.authority.clone(),
            scopes: connection.scopes.clone(),
            allow_interactive: connection.auth_method.is_interactive(),
        }
    }

    pub fn with_interactive_fallback(mut self, allow: bool) -> Self {
        self.allow_interactive = allow && self.method.is_interactive();
        self
    }
}

/// Credential-lifecycle manager implementing the device-code state machine.
pub struct AuthSessionManager {
    settings: AuthSettings,
    identity: IdentityClient,
    cache: TokenCache,
    prompt: Arc<dyn VerificationPrompt>,
    clock: Arc<dyn Clock>,
    state: RwLock<AuthState>,
    session: RwLock<Option<AuthSession>>,
    /// Serialises silent renewal
    refresh_lock: Mutex<()>,
    /// Serialises device-code flows
    flow_lock: Mutex<()>,
    /// Incremented after every successful device-code flow
    flow_generation: AtomicU64,
}

impl AuthSessionManager {
    /// Creates a new session manager.
    ///
    /// # Arguments
    ///
    /// * `settings` - Resolved authentication settings
    /// * `http_client` - Host HTTP client used for identity-provider calls
    /// * `credential_cache` - Where sessions are persisted between runs
    /// * `prompt` - Shows the device-code challenge to the operator
    pub fn new(
        settings: AuthSettings,
        http_client: Arc<dyn HttpClient>,
        credential_cache: Arc<dyn CredentialCache>,
        prompt: Arc<dyn VerificationPrompt>,
    ) -> Self {
        let identity = IdentityClient::new(
            settings.authority.clone(),
            settings.tenant_id.clone(),
            settings.client_id.clone(),
            http_client,
        );

        Self {
            settings,
            identity,
            cache: TokenCache::new(credential_cache),
            prompt,
            clock: Arc::new(SystemClock),
            state: RwLock::new(AuthState::Unauthenticated),
            session: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            flow_lock: Mutex::new(()),
            flow_generation: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    // ========================================================================
    // Read-only queries
    // ========================================================================

    pub async fn state(&self) -> AuthState {
        *self.state.read().await
    }

    /// Whether a usable session is held. Never performs network calls.
    pub async fn is_authenticated(&self) -> bool {
        if !self.state().await.is_authenticated() {
            return false;
        }
        let now = self.clock.now();
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(|s| !s.is_expired_at(now, ChronoDuration::zero()) || s.can_refresh())
    }

    pub async fn current_account(&self) -> Option<AccountInfo> {
        self.session.read().await.as_ref().map(|s| s.account.clone())
    }

    pub async fn status(&self) -> AuthStatus {
        let session = self.session.read().await;
        AuthStatus {
            state: self.state().await,
            account: session.as_ref().map(|s| s.account.clone()),
            expires_at: session.as_ref().map(|s| s.expires_at),
            cache_location: self.cache.location(),
        }
    }

    // ========================================================================
    // Session loading
    // ========================================================================

    /// Load the persisted session into memory without any network calls.
    ///
    /// Cache read failures are logged and ignored.
    #[instrument(skip(self), fields(tenant = %self.settings.tenant_id))]
    pub async fn load_cached_session(&self) -> bool {
        match self
            .cache
            .load(&self.settings.tenant_id, &self.settings.client_id)
            .await
        {
            Ok(Some(session)) => {
                info!(
                    account = %redact_if_sensitive("account", &session.account.username),
                    "Loaded cached session"
                );
                *self.session.write().await = Some(session);
                self.set_state(AuthState::Authenticated).await;
                true
            }
            Ok(None) => {
                debug!("No cached session");
                false
            }
            Err(e) => {
                warn!(error = %e, "Token cache unreadable, continuing without it");
                false
            }
        }
    }

    // ========================================================================
    // Token acquisition
    // ========================================================================

    /// The single entry point for obtaining an access token.
    ///
    /// Returns a cached token without any user interaction when possible and
    /// falls back to the device-code flow only when silent acquisition fails.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InteractionRequired`] if silent renewal failed and
    ///   interactive fallback is disabled
    /// - Any device-code flow error when the fallback runs
    #[instrument(skip(self), fields(tenant = %self.settings.tenant_id))]
    pub async fn get_valid_access_token(&self) -> Result<String> {
        if let Some(token) = self.valid_in_memory_token().await {
            return Ok(token);
        }

        // Observed before silent acquisition so a flow completed meanwhile is reused.
        let generation = self.flow_generation.load(Ordering::SeqCst);

        match self.acquire_silently().await {
            Ok(session) => Ok(session.access_token),
            Err(e) if self.settings.allow_interactive => {
                warn!(error = %e, "Silent token acquisition failed, starting device sign-in");
                let session = self.device_flow_after(generation).await?;
                Ok(session.access_token)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the device-code flow.
    ///
    /// Displays the user code through the [`VerificationPrompt`] and polls
    /// until the user finishes. Concurrent callers share one challenge.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AuthorizationDeclined`] / [`AuthError::DeviceCodeExpired`]:
    ///   fatal for this attempt, the caller must start again
    /// - [`AuthError::UnsupportedMethod`] for non-interactive connections
    #[instrument(skip(self), fields(tenant = %self.settings.tenant_id))]
    pub async fn start_device_flow(&self) -> Result<AuthSession> {
        let generation = self.flow_generation.load(Ordering::SeqCst);
        self.device_flow_after(generation).await
    }

    async fn device_flow_after(&self, observed_generation: u64) -> Result<AuthSession> {
        if !self.settings.method.is_interactive() {
            return Err(AuthError::UnsupportedMethod(format!(
                "device sign-in is not available for {} authentication",
                self.settings.method
            )));
        }

        let _flow = self.flow_lock.lock().await;

        if self.flow_generation.load(Ordering::SeqCst) != observed_generation {
            if let Some(session) = self.session.read().await.clone() {
                debug!("Reusing session from a device sign-in that completed while waiting");
                return Ok(session);
            }
        }

        match self.run_device_flow().await {
            Ok(session) => {
                self.flow_generation.fetch_add(1, Ordering::SeqCst);
                Ok(session)
            }
            Err(e) => {
                error!(error = %e, "Device sign-in failed");
                let fallback = if self.session.read().await.is_some() {
                    AuthState::Authenticated
                } else {
                    AuthState::Unauthenticated
                };
                self.set_state(fallback).await;
                Err(e)
            }
        }
    }

    async fn run_device_flow(&self) -> Result<AuthSession> {
        let grant = self
            .identity
            .request_device_code(&self.settings.scopes)
            .await?;
        self.set_state(AuthState::ChallengeIssued).await;

        let challenge = DeviceChallenge {
            user_code: grant.user_code.clone(),
            verification_uri: grant.verification_uri.clone(),
            message: grant.message.clone(),
            expires_at: self.clock.now() + ChronoDuration::seconds(grant.expires_in as i64),
        };
        if let Err(e) = self.prompt.show_challenge(&challenge).await {
            warn!(error = %e, "Could not display the device code");
        }

        let tokens = self.identity.poll_for_token(&grant).await?;
        let session = self.build_session(tokens, None);
        self.install_session(session.clone()).await;
        info!(
            account = %redact_if_sensitive("account", &session.account.username),
            "Signed in with device code"
        );
        Ok(session)
    }

    async fn valid_in_memory_token(&self) -> Option<String> {
        let now = self.clock.now();
        let buffer = ChronoDuration::seconds(TOKEN_REFRESH_BUFFER_SECS);
        self.session
            .read()
            .await
            .as_ref()
            .filter(|s| !s.is_expired_at(now, buffer))
            .map(|s| s.access_token.clone())
    }

    /// Steps 1 to 4 of the acquisition order, under the refresh lock.
    async fn acquire_silently(&self) -> Result<AuthSession> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if self.valid_in_memory_token().await.is_some() {
            if let Some(session) = self.session.read().await.clone() {
                return Ok(session);
            }
        }

        if self.session.read().await.is_none() {
            match self
                .cache
                .load(&self.settings.tenant_id, &self.settings.client_id)
                .await
            {
                Ok(Some(cached)) => {
                    *self.session.write().await = Some(cached);
                    if self.valid_in_memory_token().await.is_some() {
                        self.set_state(AuthState::Authenticated).await;
                        debug!("Using token from cache");
                        if let Some(session) = self.session.read().await.clone() {
                            return Ok(session);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Token cache unreadable, ignoring it"),
            }
        }

        self.set_state(AuthState::Refreshing).await;
        let result = match timeout(SILENT_AUTH_TIMEOUT, self.renew()).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::OperationTimeout {
                operation: "silent token renewal".to_string(),
            }),
        };

        match result {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!(error = %e, "Silent renewal failed");
                *self.session.write().await = None;
                self.set_state(AuthState::Unauthenticated).await;
                Err(e)
            }
        }
    }

    async fn renew(&self) -> Result<AuthSession> {
        let current = self.session.read().await.clone();

        if let Some(refresh_token) = current.as_ref().and_then(|s| s.refresh_token.clone()) {
            info!("Access token expired or expiring soon, refreshing");
            let tokens = self
                .identity
                .refresh(&refresh_token, &self.settings.scopes)
                .await?;
            let session = self.build_session(tokens, current.map(|s| s.account));
            self.install_session(session.clone()).await;
            return Ok(session);
        }

        match &self.settings.credential {
            CredentialMaterial::ClientSecret(secret) => {
                info!("Requesting application token");
                let tokens = self
                    .identity
                    .client_credentials(secret, &self.settings.scopes)
                    .await?;
                let session = self.build_session(tokens, None);
                self.install_session(session.clone()).await;
                Ok(session)
            }
            CredentialMaterial::Certificate(_) => Err(AuthError::UnsupportedMethod(
                "certificate credentials are not supported; use client_secret or oauth2"
                    .to_string(),
            )),
            CredentialMaterial::Interactive => Err(AuthError::InteractionRequired),
        }
    }

    /// Replace a token the remote service rejected.
    ///
    /// If `rejected_token` is still the current token it is discarded and a
    /// silent renewal is forced; if another caller already replaced it, the
    /// newer token is returned without further calls. Use at most once per
    /// original request.
    #[instrument(skip(self, rejected_token))]
    pub async fn refresh_after_rejection(&self, rejected_token: &str) -> Result<String> {
        {
            let _guard = self.refresh_lock.lock().await;
            let mut session = self.session.write().await;
            match session.as_mut() {
                Some(current) if current.access_token == rejected_token => {
                    warn!("Access token rejected by the service, forcing renewal");
                    current.invalidate_access_token(self.clock.now());
                }
                Some(current) => {
                    if !current.is_expired_at(self.clock.now(), ChronoDuration::zero()) {
                        return Ok(current.access_token.clone());
                    }
                }
                None => {}
            }
        }

        self.get_valid_access_token().await
    }

    // ========================================================================
    // Sign-out
    // ========================================================================

    /// Drop the in-memory session and every cached session of this tenant
    /// and client. The cache file is deleted once no other client's sessions
    /// remain in it.
    ///
    /// Cache errors are logged; the in-memory reset always happens.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) {
        *self.session.write().await = None;
        self.set_state(AuthState::Unauthenticated).await;

        let result = self
            .cache
            .remove_client(&self.settings.tenant_id, &self.settings.client_id)
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to delete token cache");
        }
        info!("Signed out");
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn build_session(&self, tokens: TokenSet, previous_account: Option<AccountInfo>) -> AuthSession {
        let account = tokens
            .account
            .or(previous_account)
            .unwrap_or_else(|| match self.settings.method {
                AuthMethod::DeviceCode => AccountInfo::unknown(),
                _ => AccountInfo::application(&self.settings.client_id),
            });

        AuthSession {
            account,
            tenant_id: self.settings.tenant_id.clone(),
            client_id: self.settings.client_id.clone(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: self.clock.now() + ChronoDuration::seconds(tokens.expires_in),
            cache_location: Some(self.cache.location()),
        }
    }

    /// Make `session` current and persist it. Persistence failures are non-fatal.
    async fn install_session(&self, session: AuthSession) {
        if let Err(e) = self.cache.store(&session).await {
            warn!(error = %e, "Failed to persist session; keeping it in memory only");
        }
        *self.session.write().await = Some(session);
        self.set_state(AuthState::Authenticated).await;
    }

    async fn set_state(&self, next: AuthState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!(from = ?*state, to = ?next, "Auth state transition");
            *state = next;
        }
    }
}

#[async_trait]
impl AccessTokenProvider for AuthSessionManager {
    async fn access_token(&self) -> Result<String> {
        self.get_valid_access_token().await
    }

    async fn refresh_after_rejection(&self, rejected_token: &str) -> Result<String> {
        AuthSessionManager::refresh_after_rejection(self, rejected_token).await
    }
}
