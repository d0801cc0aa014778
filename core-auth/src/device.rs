//! OAuth 2.0 Device Authorization Grant (RFC 8628) client
//!
//! Talks to the identity provider's v2.0 endpoints:
//! - `POST {authority}/{tenant}/oauth2/v2.0/devicecode` issues a user code
//! - `POST {authority}/{tenant}/oauth2/v2.0/token` is polled until the user
//!   finishes signing in, and also serves refresh and client-credential grants
//!
//! # Security
//!
//! Device codes, tokens and secrets are never logged.

use crate::error::{AuthError, Result};
use crate::types::AccountInfo;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Added to the polling interval on every `slow_down` answer.
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// A device code issued by the identity provider.
#[derive(Clone, Deserialize)]
pub struct DeviceCodeGrant {
    pub device_code: String,
    pub user_code: String,
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub message: Option<String>,
}

impl std::fmt::Debug for DeviceCodeGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCodeGrant")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish()
    }
}

fn default_interval() -> u64 {
    5
}

/// Tokens returned by any grant.
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub account: Option<AccountInfo>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    id_token: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    upn: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    tid: Option<String>,
}

/// Client for the identity provider's token endpoints.
pub struct IdentityClient {
    authority: String,
    tenant_id: String,
    client_id: String,
    http_client: Arc<dyn HttpClient>,
}

impl IdentityClient {
    /// # Arguments
    ///
    /// * `authority` - e.g. `https://login.microsoftonline.com`
    /// * `tenant_id` - directory (tenant) id or domain
    /// * `client_id` - application (client) id
    pub fn new(
        authority: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            authority: authority.into().trim_end_matches('/').to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            http_client,
        }
    }

    pub fn device_code_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/devicecode", self.authority, self.tenant_id)
    }

    pub fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id)
    }

    /// Ask the provider for a new device code.
    #[instrument(skip(self), fields(tenant = %self.tenant_id))]
    pub async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceCodeGrant> {
        let scope = scopes.join(" ");
        let params = [("client_id", self.client_id.as_str()), ("scope", scope.as_str())];
        let response = self.post_form(self.device_code_url(), &params).await?;

        if !response.is_success() {
            return Err(AuthError::AuthenticationFailed {
                reason: describe_error(&response),
            });
        }

        let grant: DeviceCodeGrant = response.json().map_err(|e| {
            AuthError::Other(format!("Failed to parse device code response: {}", e))
        })?;
        debug!(
            expires_in = grant.expires_in,
            interval = grant.interval,
            "Device code issued"
        );
        Ok(grant)
    }

    /// Poll the token endpoint until the user completes sign-in.
    ///
    /// Waits `interval` seconds between polls and widens the interval on
    /// `slow_down`. Transport errors are logged and polling continues until
    /// the code's lifetime runs out.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AuthorizationDeclined`] if the user refused
    /// - [`AuthError::DeviceCodeExpired`] if the code expired first
    /// - [`AuthError::AuthenticationFailed`] for any other provider error
    #[instrument(skip(self, grant), fields(tenant = %self.tenant_id))]
    pub async fn poll_for_token(&self, grant: &DeviceCodeGrant) -> Result<TokenSet> {
        let deadline = Instant::now() + Duration::from_secs(grant.expires_in);
        let mut interval = Duration::from_secs(grant.interval.max(1));

        loop {
            sleep(interval).await;
            if Instant::now() >= deadline {
                warn!("Device code expired while waiting for the user");
                return Err(AuthError::DeviceCodeExpired);
            }

            let params = [
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", self.client_id.as_str()),
                ("device_code", grant.device_code.as_str()),
            ];

            let response = match self.post_form(self.token_url(), &params).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "Token poll failed, will retry");
                    continue;
                }
            };

            if response.is_success() {
                info!("Device sign-in completed");
                return self.parse_tokens(&response);
            }

            match response.json::<ErrorResponse>() {
                Ok(err) => match err.error.as_str() {
                    "authorization_pending" => {
                        debug!("Authorization pending");
                    }
                    "slow_down" => {
                        interval += SLOW_DOWN_INCREMENT;
                        debug!(interval_secs = interval.as_secs(), "Provider asked to slow down");
                    }
                    "authorization_declined" | "access_denied" => {
                        return Err(AuthError::AuthorizationDeclined);
                    }
                    "expired_token" | "code_expired" => {
                        return Err(AuthError::DeviceCodeExpired);
                    }
                    _ => {
                        return Err(AuthError::AuthenticationFailed {
                            reason: format_provider_error(&err),
                        });
                    }
                },
                Err(_) if response.is_server_error() => {
                    warn!(status = response.status, "Token endpoint unavailable, will retry");
                }
                Err(_) => {
                    return Err(AuthError::AuthenticationFailed {
                        reason: describe_error(&response),
                    });
                }
            }
        }
    }

    /// Exchange a refresh token for a new access token.
    #[instrument(skip(self, refresh_token), fields(tenant = %self.tenant_id))]
    pub async fn refresh(&self, refresh_token: &str, scopes: &[String]) -> Result<TokenSet> {
        let scope = scopes.join(" ");
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        let response = self
            .post_form(self.token_url(), &params)
            .await
            .map_err(|e| AuthError::TokenRefreshFailed(e.to_string()))?;

        if !response.is_success() {
            let reason = describe_error(&response);
            warn!(status = response.status, "Token refresh rejected");
            return Err(AuthError::TokenRefreshFailed(reason));
        }

        let mut tokens = self.parse_tokens(&response)?;
        // Providers may omit the refresh token when it is not rotated.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    /// Client-credentials grant with an application secret.
    #[instrument(skip(self, client_secret), fields(tenant = %self.tenant_id))]
    pub async fn client_credentials(
        &self,
        client_secret: &str,
        scopes: &[String],
    ) -> Result<TokenSet> {
        let scope = scopes.join(" ");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", client_secret),
            ("scope", scope.as_str()),
        ];

        let response = self.post_form(self.token_url(), &params).await?;
        if !response.is_success() {
            return Err(AuthError::AuthenticationFailed {
                reason: describe_error(&response),
            });
        }

        let mut tokens = self.parse_tokens(&response)?;
        tokens.account = Some(AccountInfo::application(&self.client_id));
        Ok(tokens)
    }

    async fn post_form(&self, url: String, params: &[(&str, &str)]) -> Result<HttpResponse> {
        let encoded = serde_urlencoded::to_string(params)
            .map_err(|e| AuthError::Other(format!("Failed to encode token request: {}", e)))?;

        let request = HttpRequest::new(HttpMethod::Post, url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Bytes::from(encoded));

        Ok(self.http_client.execute(request).await?)
    }

    fn parse_tokens(&self, response: &HttpResponse) -> Result<TokenSet> {
        let parsed: TokenResponse = response
            .json()
            .map_err(|e| AuthError::Other(format!("Failed to parse token response: {}", e)))?;

        let account = parsed.id_token.as_deref().map(account_from_id_token);

        Ok(TokenSet {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
            expires_in: parsed.expires_in,
            account,
        })
    }
}

/// Read the account identity from an unverified id_token.
///
/// The token came straight from the token endpoint over TLS, so the
/// signature is not checked here. Malformed tokens yield `"unknown"`.
pub fn account_from_id_token(id_token: &str) -> AccountInfo {
    let claims = id_token
        .split('.')
        .nth(1)
        .and_then(|payload| URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok())
        .and_then(|bytes| serde_json::from_slice::<IdTokenClaims>(&bytes).ok())
        .unwrap_or_default();

    let username = claims
        .preferred_username
        .or(claims.upn)
        .or(claims.email)
        .unwrap_or_else(|| AccountInfo::UNKNOWN.to_string());

    AccountInfo {
        username,
        display_name: claims.name,
        object_id: claims.oid,
        home_tenant_id: claims.tid,
    }
}

fn format_provider_error(err: &ErrorResponse) -> String {
    match &err.error_description {
        Some(description) => format!("{}: {}", err.error, description),
        None => err.error.clone(),
    }
}

fn describe_error(response: &HttpResponse) -> String {
    match response.json::<ErrorResponse>() {
        Ok(err) => format_provider_error(&err),
        Err(_) => format!(
            "identity provider returned HTTP {}: {}",
            response.status,
            response.text().unwrap_or_default()
        ),
    }
}
