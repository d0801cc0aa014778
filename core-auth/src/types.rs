use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the signed-in principal.
///
/// For the device-code flow this comes from the `id_token` claims; for
/// client credentials it is the application itself.
///
/// # Examples
///
/// ```
/// use core_auth::AccountInfo;
///
/// let app = AccountInfo::application("c1");
/// assert_eq!(app.username, "c1");
/// assert!(app.object_id.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// `preferred_username` (usually the UPN), or `"unknown"`
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Directory object id (`oid` claim)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Home tenant (`tid` claim)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_tenant_id: Option<String>,
}

impl AccountInfo {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn unknown() -> Self {
        Self::named(Self::UNKNOWN)
    }

    pub fn application(client_id: &str) -> Self {
        Self::named(client_id)
    }

    fn named(username: &str) -> Self {
        Self {
            username: username.to_string(),
            display_name: None,
            object_id: None,
            home_tenant_id: None,
        }
    }
}

impl fmt::Display for AccountInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} <{}>", name, self.username),
            None => f.write_str(&self.username),
        }
    }
}

/// An authenticated session held by the session manager.
///
/// # Security
///
/// The `Debug` implementation redacts token material.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub account: AccountInfo,
    pub tenant_id: String,
    pub client_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Where the session is persisted, if anywhere
    pub cache_location: Option<String>,
}

impl AuthSession {
    /// `true` if the access token expires within `buffer` of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now >= self.expires_at - buffer
    }

    /// Whether a silent refresh is possible.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Force the next validity check to fail while keeping refresh material.
    pub fn invalidate_access_token(&mut self, now: DateTime<Utc>) {
        self.expires_at = now - Duration::seconds(1);
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("account", &self.account)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("cache_location", &self.cache_location)
            .finish()
    }
}

/// Authentication state machine.
///
/// # State Transitions
///
/// ```text
/// Unauthenticated -> ChallengeIssued -> Authenticated
///        ^                  |             ^      |
///        |                  v             |      v
///        +------------- (failure) <--- Refreshing
/// ```
///
/// Signing out resets any state to `Unauthenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    /// A device code has been issued and the user has not finished yet
    ChallengeIssued,
    Authenticated,
    /// Silent renewal in progress
    Refreshing,
}

impl AuthState {
    /// Returns `true` for `Authenticated` and `Refreshing`.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Refreshing)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, AuthState::ChallengeIssued | AuthState::Refreshing)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::Unauthenticated => write!(f, "Not signed in"),
            AuthState::ChallengeIssued => write!(f, "Waiting for device sign-in..."),
            AuthState::Authenticated => write!(f, "Signed in"),
            AuthState::Refreshing => write!(f, "Refreshing token..."),
        }
    }
}

/// Read-only view of the manager for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    pub state: AuthState,
    pub account: Option<AccountInfo>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cache_location: String,
}
