//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, credential
//! cache, verification prompt) into the publisher core and exposes the
//! operations a front end needs: sign-in, connection test, status, publish
//! and sign-out. Desktop hosts enable the `desktop-shims` feature (which
//! depends on `bridge-desktop`) and call [`bootstrap_desktop`].

pub mod error;
pub mod service;

pub use error::{exit_code, Result, ServiceError};
pub use service::{
    Connectivity, PublishRequest, PublisherService, ServiceOptions, ServiceStatus,
};

use std::sync::Arc;

use bridge_traits::{http::HttpClient, prompt::VerificationPrompt, storage::CredentialCache};

/// Aggregated handle to all bridge dependencies the core requires.
#[derive(Clone)]
pub struct PublisherDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub credential_cache: Arc<dyn CredentialCache>,
    pub prompt: Arc<dyn VerificationPrompt>,
}

impl PublisherDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        credential_cache: Arc<dyn CredentialCache>,
        prompt: Arc<dyn VerificationPrompt>,
    ) -> Self {
        Self {
            http_client,
            credential_cache,
            prompt,
        }
    }
}

#[cfg(feature = "desktop-shims")]
impl PublisherDependencies {
    /// reqwest transport, cache file under the user config directory and a
    /// stderr prompt.
    pub fn desktop() -> Result<Self> {
        let cache = bridge_desktop::FileCredentialCache::default_location().map_err(|e| {
            ServiceError::CapabilityMissing {
                capability: "credential cache".to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Self::new(
            Arc::new(bridge_desktop::ReqwestHttpClient::new()),
            Arc::new(cache),
            Arc::new(bridge_desktop::ConsolePrompt::new()),
        ))
    }
}

/// Convenience bootstrapper for desktop hosts.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_service::{bootstrap_desktop, ServiceOptions};
/// use core_runtime::config::load_config;
///
/// let config = load_config("docpub.json")?;
/// let service = bootstrap_desktop(&config, ServiceOptions::default())?;
/// let repository = service.test_connection().await?;
/// println!("{}", repository.drive_name);
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop(
    config: &core_runtime::config::PublisherConfig,
    options: ServiceOptions,
) -> Result<PublisherService> {
    PublisherService::from_config(config, PublisherDependencies::desktop()?, options)
}
