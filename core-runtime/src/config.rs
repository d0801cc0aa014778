//! # Publisher Configuration
//!
//! Connection settings for the document repository and the rules that turn
//! them into a [`RepositoryConnection`].
//!
//! ## Overview
//!
//! The configuration file is JSON with camelCase keys:
//!
//! ```json
//! {
//!   "authMethod": "oauth2",
//!   "tenantId": "t1",
//!   "clientId": "c1",
//!   "repositoryAddress": "https://contoso.sharepoint.com/sites/docs",
//!   "libraryName": "Documents",
//!   "rootFolderPath": "Published",
//!   "oauth2": { "redirectUri": "https://localhost/cb", "scopes": ["Sites.ReadWrite.All"] },
//!   "publishingOptions": { "maxConcurrency": 3 }
//! }
//! ```
//!
//! Values from `SHAREPOINT_*` environment variables override the file
//! field-for-field (see [`apply_env_overrides`]).
//!
//! ## Validation
//!
//! [`ConfigResolver::validate`] never stops at the first problem. It returns
//! every violation as a `(field, message)` pair together with advisory
//! warnings, so an operator can fix a broken file in one pass.
//!
//! ```ignore
//! use core_runtime::config::{ConfigResolver, load_config};
//!
//! let raw = load_config("docpub.config.json")?;
//! let connection = ConfigResolver::resolve(&raw)?;
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};
use url::Url;

/// Identity provider used when `oauth2.authority` is not set.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Scopes requested by the device-code flow when no `oauth2` block is present.
pub const DEFAULT_SCOPES: &[&str] = &["https://graph.microsoft.com/.default", "offline_access"];

/// Callback address used when `oauth2.redirectUri` is not configured.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// Characters the repository refuses in file and folder names.
pub const INVALID_PATH_CHARS: &[char] = &['"', '*', ':', '<', '>', '?', '\\', '|'];

pub const MAX_CONCURRENCY: usize = 16;

/// Above this the service is likely to start throttling.
pub const CONCURRENCY_WARNING_THRESHOLD: usize = 8;

// ============================================================================
// Raw configuration (file contract)
// ============================================================================

/// Configuration as written in the file, before validation.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_path: Option<String>,
    #[serde(default)]
    pub repository_address: String,
    #[serde(default)]
    pub library_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishing_options: Option<PublishingOptions>,
}

impl fmt::Debug for PublisherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherConfig")
            .field("auth_method", &self.auth_method)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("certificate_path", &self.certificate_path)
            .field("repository_address", &self.repository_address)
            .field("library_name", &self.library_name)
            .field("root_folder_path", &self.root_folder_path)
            .field("oauth2", &self.oauth2)
            .field("publishing_options", &self.publishing_options)
            .finish()
    }
}

/// Interactive (device-code) flow settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Settings {
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

impl OAuth2Settings {
    /// The settings an absent `oauth2` block stands for.
    pub fn interactive_defaults() -> Self {
        Self {
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            authority: None,
        }
    }
}

/// Publishing behaviour. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishingOptions {
    pub enable_versioning: bool,
    pub create_folders: bool,
    pub overwrite_existing: bool,
    pub add_metadata: bool,
    pub max_concurrency: usize,
    pub default_tags: Vec<String>,
}

impl Default for PublishingOptions {
    fn default() -> Self {
        Self {
            enable_versioning: true,
            create_folders: true,
            overwrite_existing: false,
            add_metadata: true,
            max_concurrency: 3,
            default_tags: Vec::new(),
        }
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// How the publisher obtains access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// OAuth2 device-code flow on behalf of a signed-in user
    DeviceCode,
    /// Client-credentials grant with an application secret
    ClientSecret,
    /// Client-credentials grant with a certificate assertion
    Certificate,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::DeviceCode => "oauth2",
            AuthMethod::ClientSecret => "client_secret",
            AuthMethod::Certificate => "certificate",
        }
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, AuthMethod::DeviceCode)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "oauth2" | "device_code" | "interactive" => Ok(AuthMethod::DeviceCode),
            "client_secret" | "app" => Ok(AuthMethod::ClientSecret),
            "certificate" => Ok(AuthMethod::Certificate),
            other => Err(Error::Config(format!(
                "unknown authentication method '{}'",
                other
            ))),
        }
    }
}

/// Secret material backing the selected [`AuthMethod`].
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialMaterial {
    /// The user supplies credentials out-of-band
    Interactive,
    ClientSecret(String),
    Certificate(PathBuf),
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialMaterial::Interactive => f.write_str("Interactive"),
            CredentialMaterial::ClientSecret(_) => f.write_str("ClientSecret([REDACTED])"),
            CredentialMaterial::Certificate(path) => {
                f.debug_tuple("Certificate").field(path).finish()
            }
        }
    }
}

/// A validated, normalised connection. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConnection {
    pub auth_method: AuthMethod,
    pub tenant_id: String,
    pub client_id: String,
    pub credential: CredentialMaterial,
    /// Absolute https URL without a trailing slash
    pub repository_address: String,
    pub library_name: String,
    /// Slash separated, no leading or trailing slash; empty means the library root
    pub root_folder_path: String,
    pub authority: String,
    pub scopes: Vec<String>,
    pub redirect_uri: Option<String>,
    pub publishing: PublishingOptions,
}

// ============================================================================
// Validation
// ============================================================================

/// A single problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Dotted camelCase path of the offending key, e.g. `oauth2.scopes`
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every error and warning found by [`ConfigResolver::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ConfigIssue>,
    pub warnings: Vec<ConfigIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fields that failed validation, in the order they were checked.
    pub fn error_fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ConfigIssue::new(field, message));
    }

    fn warning(&mut self, field: &str, message: impl Into<String>) {
        self.warnings.push(ConfigIssue::new(field, message));
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.errors.len())?;
        for issue in &self.errors {
            write!(f, "\n  - {}", issue)?;
        }
        Ok(())
    }
}

/// Validates raw configuration and produces a [`RepositoryConnection`].
///
/// Pure: performs no I/O and no network calls.
pub struct ConfigResolver;

impl ConfigResolver {
    /// Check a configuration, collecting every violation.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::{ConfigResolver, PublisherConfig};
    ///
    /// let report = ConfigResolver::validate(&PublisherConfig::default());
    /// assert!(report.error_fields().contains(&"tenantId"));
    /// assert!(report.error_fields().contains(&"libraryName"));
    /// ```
    pub fn validate(config: &PublisherConfig) -> ValidationReport {
        let mut report = ValidationReport::default();

        let method = match config.auth_method.as_deref() {
            None => Some(AuthMethod::DeviceCode),
            Some(raw) if raw.trim().is_empty() => {
                report.error("authMethod", "authentication method is required");
                None
            }
            Some(raw) => match raw.parse::<AuthMethod>() {
                Ok(method) => Some(method),
                Err(_) => {
                    report.error(
                        "authMethod",
                        format!(
                            "unknown authentication method '{}' (expected oauth2, client_secret or certificate)",
                            raw
                        ),
                    );
                    None
                }
            },
        };

        if is_blank(&config.tenant_id) {
            report.error("tenantId", "tenant identifier is required");
        }
        if is_blank(&config.client_id) {
            report.error("clientId", "client identifier is required");
        }

        if is_blank(&config.repository_address) {
            report.error("repositoryAddress", "repository address is required");
        } else if let Err(message) = check_https_url(&config.repository_address) {
            report.error("repositoryAddress", message);
        }

        if is_blank(&config.library_name) {
            report.error("libraryName", "library name is required");
        }

        if let Some(root) = &config.root_folder_path {
            for segment in root.split('/').filter(|s| !s.trim().is_empty()) {
                if let Some(c) = segment.chars().find(|c| INVALID_PATH_CHARS.contains(c)) {
                    report.error(
                        "rootFolderPath",
                        format!("segment '{}' contains invalid character '{}'", segment, c),
                    );
                }
            }
        }

        match method {
            Some(AuthMethod::DeviceCode) => {
                if let Some(oauth2) = &config.oauth2 {
                    if is_blank(&oauth2.redirect_uri) {
                        report.error("oauth2.redirectUri", "callback address is required");
                    } else if Url::parse(&oauth2.redirect_uri).is_err() {
                        report.error("oauth2.redirectUri", "callback address is not a valid URL");
                    }
                    if oauth2.scopes.iter().all(|s| is_blank(s)) {
                        report.error("oauth2.scopes", "at least one scope is required");
                    }
                }
                if config.client_secret.as_deref().is_some_and(|s| !is_blank(s)) {
                    report.warning(
                        "clientSecret",
                        "a client secret is ignored by the interactive flow",
                    );
                }
            }
            Some(AuthMethod::ClientSecret) => {
                if config.client_secret.as_deref().map_or(true, is_blank) {
                    report.error(
                        "clientSecret",
                        "client secret is required for the client_secret method",
                    );
                }
            }
            Some(AuthMethod::Certificate) => {
                if config.certificate_path.as_deref().map_or(true, is_blank) {
                    report.error(
                        "certificatePath",
                        "certificate reference is required for the certificate method",
                    );
                }
            }
            None => {}
        }

        if let Some(authority) = config.oauth2.as_ref().and_then(|o| o.authority.as_deref()) {
            if let Err(message) = check_https_url(authority) {
                report.error("oauth2.authority", message);
            }
        }

        let options = config.publishing_options.clone().unwrap_or_default();
        if !(1..=MAX_CONCURRENCY).contains(&options.max_concurrency) {
            report.error(
                "publishingOptions.maxConcurrency",
                format!("must be between 1 and {}", MAX_CONCURRENCY),
            );
        } else if options.max_concurrency > CONCURRENCY_WARNING_THRESHOLD {
            report.warning(
                "publishingOptions.maxConcurrency",
                format!(
                    "{} parallel uploads is likely to be throttled",
                    options.max_concurrency
                ),
            );
        }
        if !options.enable_versioning {
            report.warning(
                "publishingOptions.enableVersioning",
                "versioning is disabled; replaced documents lose their history",
            );
        }
        if options.default_tags.is_empty() {
            report.warning("publishingOptions.defaultTags", "no default tags configured");
        }
        if options.overwrite_existing {
            report.warning(
                "publishingOptions.overwriteExisting",
                "existing documents with the same name will be replaced",
            );
        }

        debug!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Validated publisher configuration"
        );
        report
    }

    /// Validate and normalise into a [`RepositoryConnection`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] carrying the full report when any check fails.
    pub fn resolve(config: &PublisherConfig) -> Result<RepositoryConnection> {
        let report = Self::validate(config);
        if !report.is_valid() {
            return Err(Error::Invalid(report));
        }
        for issue in &report.warnings {
            warn!(field = %issue.field, "{}", issue.message);
        }

        let auth_method = match config.auth_method.as_deref() {
            Some(raw) => raw.parse()?,
            None => AuthMethod::DeviceCode,
        };

        let credential = match auth_method {
            AuthMethod::DeviceCode => CredentialMaterial::Interactive,
            AuthMethod::ClientSecret => CredentialMaterial::ClientSecret(
                config.client_secret.clone().unwrap_or_default(),
            ),
            AuthMethod::Certificate => CredentialMaterial::Certificate(PathBuf::from(
                config.certificate_path.clone().unwrap_or_default(),
            )),
        };

        let authority = config
            .oauth2
            .as_ref()
            .and_then(|o| o.authority.clone())
            .unwrap_or_else(|| DEFAULT_AUTHORITY.to_string())
            .trim_end_matches('/')
            .to_string();

        let scopes = match (&config.oauth2, auth_method) {
            (Some(oauth2), AuthMethod::DeviceCode) => oauth2
                .scopes
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            (None, AuthMethod::DeviceCode) => DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            // Client credentials always use the resource's static permissions.
            _ => vec!["https://graph.microsoft.com/.default".to_string()],
        };

        Ok(RepositoryConnection {
            auth_method,
            tenant_id: config.tenant_id.trim().to_string(),
            client_id: config.client_id.trim().to_string(),
            credential,
            repository_address: config.repository_address.trim().trim_end_matches('/').to_string(),
            library_name: config.library_name.trim().to_string(),
            root_folder_path: normalize_folder_path(config.root_folder_path.as_deref().unwrap_or("")),
            authority,
            scopes,
            redirect_uri: match (&config.oauth2, auth_method) {
                (Some(oauth2), _) => Some(oauth2.redirect_uri.trim().to_string())
                    .filter(|s| !s.is_empty()),
                (None, AuthMethod::DeviceCode) => Some(DEFAULT_REDIRECT_URI.to_string()),
                (None, _) => None,
            },
            publishing: config.publishing_options.clone().unwrap_or_default(),
        })
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn check_https_url(raw: &str) -> std::result::Result<(), String> {
    let url = Url::parse(raw.trim()).map_err(|e| format!("'{}' is not a valid URL: {}", raw, e))?;
    if url.scheme() != "https" {
        return Err(format!("'{}' must use https", raw));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("'{}' has no host", raw));
    }
    Ok(())
}

/// Collapse a folder path into `a/b/c` form.
pub fn normalize_folder_path(path: &str) -> String {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Environment overrides
// ============================================================================

pub const ENV_AUTH_METHOD: &str = "SHAREPOINT_AUTH_METHOD";
pub const ENV_TENANT_ID: &str = "SHAREPOINT_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "SHAREPOINT_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "SHAREPOINT_CLIENT_SECRET";
pub const ENV_CERTIFICATE_PATH: &str = "SHAREPOINT_CERTIFICATE_PATH";
pub const ENV_SITE_URL: &str = "SHAREPOINT_SITE_URL";
pub const ENV_LIBRARY_NAME: &str = "SHAREPOINT_LIBRARY_NAME";
pub const ENV_ROOT_FOLDER: &str = "SHAREPOINT_ROOT_FOLDER";
pub const ENV_REDIRECT_URI: &str = "SHAREPOINT_REDIRECT_URI";
pub const ENV_SCOPES: &str = "SHAREPOINT_SCOPES";
pub const ENV_AUTHORITY: &str = "SHAREPOINT_AUTHORITY";
pub const ENV_MAX_CONCURRENCY: &str = "SHAREPOINT_MAX_CONCURRENCY";

/// Apply environment overrides on top of file values.
///
/// `lookup` returns the value of a variable, or `None` when it is unset.
/// Empty values count as unset. Pass `|k| std::env::var(k).ok()` for the real
/// process environment.
///
/// # Errors
///
/// Returns [`Error::Config`] when `SHAREPOINT_MAX_CONCURRENCY` is not a number.
pub fn apply_env_overrides<F>(mut config: PublisherConfig, lookup: F) -> Result<PublisherConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get(ENV_AUTH_METHOD) {
        config.auth_method = Some(v);
    }
    if let Some(v) = get(ENV_TENANT_ID) {
        config.tenant_id = v;
    }
    if let Some(v) = get(ENV_CLIENT_ID) {
        config.client_id = v;
    }
    if let Some(v) = get(ENV_CLIENT_SECRET) {
        config.client_secret = Some(v);
    }
    if let Some(v) = get(ENV_CERTIFICATE_PATH) {
        config.certificate_path = Some(v);
    }
    if let Some(v) = get(ENV_SITE_URL) {
        config.repository_address = v;
    }
    if let Some(v) = get(ENV_LIBRARY_NAME) {
        config.library_name = v;
    }
    if let Some(v) = get(ENV_ROOT_FOLDER) {
        config.root_folder_path = Some(v);
    }

    let redirect = get(ENV_REDIRECT_URI);
    let scopes = get(ENV_SCOPES);
    let authority = get(ENV_AUTHORITY);
    if redirect.is_some() || scopes.is_some() || authority.is_some() {
        let oauth2 = config
            .oauth2
            .get_or_insert_with(OAuth2Settings::interactive_defaults);
        if let Some(v) = redirect {
            oauth2.redirect_uri = v;
        }
        if let Some(v) = scopes {
            oauth2.scopes = v
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = authority {
            oauth2.authority = Some(v);
        }
    }

    if let Some(v) = get(ENV_MAX_CONCURRENCY) {
        let parsed = v.trim().parse::<usize>().map_err(|_| {
            Error::Config(format!(
                "{} must be a positive integer, got '{}'",
                ENV_MAX_CONCURRENCY, v
            ))
        })?;
        config
            .publishing_options
            .get_or_insert_with(PublishingOptions::default)
            .max_concurrency = parsed;
    }

    Ok(config)
}

/// [`apply_env_overrides`] against the process environment.
pub fn apply_process_env(config: PublisherConfig) -> Result<PublisherConfig> {
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

// ============================================================================
// File I/O
// ============================================================================

/// Read a configuration file. A missing file yields an empty configuration so
/// that environment-only setups still work.
pub fn load_config(path: impl AsRef<Path>) -> Result<PublisherConfig> {
    let path = path.as_ref();
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            Error::Config(format!("{} is not valid configuration JSON: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No configuration file, using environment only");
            Ok(PublisherConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Write a configuration file as pretty JSON, creating parent directories.
pub fn save_config(path: impl AsRef<Path>, config: &PublisherConfig) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(config)
        .map_err(|e| Error::Internal(format!("failed to serialise configuration: {}", e)))?;
    std::fs::write(path, json)?;
    Ok(())
}
