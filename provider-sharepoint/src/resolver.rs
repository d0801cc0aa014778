//! # Repository Resolver
//!
//! Turns a site address and library name into Graph identifiers.
//!
//! Resolution happens once per process: the first successful result is kept
//! in a [`OnceCell`] and every later caller, including concurrent ones, gets
//! the same identifiers. A failed resolution is not cached.

use crate::client::GraphClient;
use crate::error::{GraphError, Result};
use crate::types::{Collection, Drive, DriveItem, Site};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};
use url::Url;

/// Stable identifiers for the target library. Read-only once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepository {
    pub site_id: String,
    pub drive_id: String,
    pub drive_name: String,
    pub site_url: Option<String>,
    /// The named library was missing and the site's default library is used
    pub used_default_drive: bool,
}

pub struct RepositoryResolver {
    client: Arc<GraphClient>,
    repository_address: String,
    library_name: String,
    resolved: OnceCell<ResolvedRepository>,
}

impl RepositoryResolver {
    pub fn new(
        client: Arc<GraphClient>,
        repository_address: impl Into<String>,
        library_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            repository_address: repository_address.into(),
            library_name: library_name.into(),
            resolved: OnceCell::new(),
        }
    }

    pub fn client(&self) -> &Arc<GraphClient> {
        &self.client
    }

    /// Resolve, or return the cached identifiers.
    ///
    /// # Errors
    ///
    /// - [`GraphError::InvalidAddress`] if the address cannot be parsed
    /// - [`GraphError::NotFound`] if the site does not exist
    /// - Any authentication error from token acquisition
    pub async fn resolve(&self) -> Result<ResolvedRepository> {
        self.resolved
            .get_or_try_init(|| self.lookup())
            .await
            .cloned()
    }

    /// Resolve and list one child of the library root to prove read access.
    #[instrument(skip(self))]
    pub async fn verify_access(&self) -> Result<ResolvedRepository> {
        let repository = self.resolve().await?;
        let path = format!("/drives/{}/root/children?$top=1&$select=id,name", repository.drive_id);
        let listing: Collection<DriveItem> = self
            .client
            .get_json(&path, &format!("library '{}'", repository.drive_name))
            .await?;
        info!(
            drive = %repository.drive_name,
            sample_items = listing.value.len(),
            "Repository access verified"
        );
        Ok(repository)
    }

    #[instrument(skip(self), fields(address = %self.repository_address, library = %self.library_name))]
    async fn lookup(&self) -> Result<ResolvedRepository> {
        let site_path = site_path(&self.repository_address)?;
        let site: Site = self
            .client
            .get_json(&site_path, &format!("site {}", self.repository_address))
            .await?;
        info!(site_id = %site.id, "Resolved site");

        let drives: Collection<Drive> = self
            .client
            .get_json(&format!("/sites/{}/drives", site.id), "document libraries")
            .await?;

        let (drive, used_default_drive) = match drives
            .value
            .into_iter()
            .find(|d| d.name.eq_ignore_ascii_case(&self.library_name))
        {
            Some(drive) => (drive, false),
            None => {
                warn!(
                    library = %self.library_name,
                    "Library not found on site, using the default document library"
                );
                let drive: Drive = self
                    .client
                    .get_json(&format!("/sites/{}/drive", site.id), "default document library")
                    .await?;
                (drive, true)
            }
        };

        info!(drive_id = %drive.id, drive = %drive.name, "Resolved document library");
        Ok(ResolvedRepository {
            site_id: site.id,
            drive_id: drive.id,
            drive_name: drive.name,
            site_url: site.web_url,
            used_default_drive,
        })
    }
}

/// Graph site path for an address such as `https://contoso.sharepoint.com/sites/docs`.
pub fn site_path(address: &str) -> Result<String> {
    let url = Url::parse(address)
        .map_err(|e| GraphError::InvalidAddress(format!("'{}': {}", address, e)))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| GraphError::InvalidAddress(format!("'{}' has no host", address)))?;

    let path = url.path().trim_matches('/');
    if path.is_empty() {
        Ok(format!("/sites/{}", host))
    } else {
        Ok(format!("/sites/{}:/{}", host, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_path() {
        assert_eq!(
            site_path("https://contoso.sharepoint.com/sites/docs/").unwrap(),
            "/sites/contoso.sharepoint.com:/sites/docs"
        );
        assert_eq!(
            site_path("https://contoso.sharepoint.com").unwrap(),
            "/sites/contoso.sharepoint.com"
        );
        assert!(matches!(
            site_path("not a url"),
            Err(GraphError::InvalidAddress(_))
        ));
    }
}
