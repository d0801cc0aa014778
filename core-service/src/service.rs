//! The publisher façade.
//!
//! One [`PublisherService`] owns the whole credential and repository chain
//! for a single connection:
//!
//! ```text
//! RepositoryConnection -> AuthSessionManager -> GraphClient
//!                                                   |
//!                     RepositoryResolver -> UploadEngine -> BatchOrchestrator
//! ```
//!
//! The session manager is created once and shared by reference with the
//! Graph client, so every upload worker fetches its token through the same
//! single-flight refresh path.

use crate::error::Result;
use crate::PublisherDependencies;
use async_trait::async_trait;
use bytes::Bytes;
use core_auth::{AccessTokenProvider, AccountInfo, AuthSessionManager, AuthSettings, AuthStatus};
use core_publish::{
    scan_directory, validate_folder_path, BatchOptions, BatchOrchestrator, BatchSummary,
    ConflictBehavior, Document, DocumentUploader, ProgressCallback, PublishError, ScanOptions,
    UploadedItem,
};
use core_runtime::config::{normalize_folder_path, ConfigResolver, PublisherConfig, RepositoryConnection};
use core_runtime::logging::{redact_if_sensitive, strip_path};
use provider_sharepoint::{GraphClient, RepositoryResolver, ResolvedRepository, UploadEngine, GRAPH_API_BASE};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Construction-time switches.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Fall back to device sign-in when silent renewal fails
    pub allow_interactive: bool,
    pub graph_base_url: String,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            allow_interactive: true,
            graph_base_url: GRAPH_API_BASE.to_string(),
        }
    }
}

impl ServiceOptions {
    pub fn non_interactive() -> Self {
        Self {
            allow_interactive: false,
            ..Self::default()
        }
    }

    pub fn with_graph_base_url(mut self, url: impl Into<String>) -> Self {
        self.graph_base_url = url.into();
        self
    }
}

/// Per-invocation overrides of the configured publishing options.
#[derive(Clone, Default)]
pub struct PublishRequest {
    pub dry_run: bool,
    pub concurrency: Option<usize>,
    pub overwrite: Option<bool>,
    /// Replaces the configured root folder
    pub target_folder: Option<String>,
    pub add_metadata: Option<bool>,
    pub progress: Option<ProgressCallback>,
}

impl PublishRequest {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }
}

/// Outcome of the optional connectivity probe in [`PublisherService::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    Reachable(ResolvedRepository),
    Unreachable(String),
    /// No session is held, so probing would prompt for sign-in
    SignInRequired,
}

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub auth: AuthStatus,
    pub repository_address: String,
    pub library_name: String,
    pub connectivity: Option<Connectivity>,
}

pub struct PublisherService {
    connection: RepositoryConnection,
    auth: Arc<AuthSessionManager>,
    resolver: RepositoryResolver,
}

impl PublisherService {
    pub fn new(
        connection: RepositoryConnection,
        deps: PublisherDependencies,
        options: ServiceOptions,
    ) -> Self {
        let settings = AuthSettings::from_connection(&connection)
            .with_interactive_fallback(options.allow_interactive);
        let auth = Arc::new(AuthSessionManager::new(
            settings,
            Arc::clone(&deps.http_client),
            deps.credential_cache,
            deps.prompt,
        ));

        let tokens: Arc<dyn AccessTokenProvider> = auth.clone();
        let graph = GraphClient::new(deps.http_client, tokens).with_base_url(options.graph_base_url);
        let resolver = RepositoryResolver::new(
            Arc::new(graph),
            connection.repository_address.clone(),
            connection.library_name.clone(),
        );

        Self {
            connection,
            auth,
            resolver,
        }
    }

    /// Validate `config` and build the service.
    ///
    /// # Errors
    ///
    /// Returns the full validation report when any field is invalid.
    pub fn from_config(
        config: &PublisherConfig,
        deps: PublisherDependencies,
        options: ServiceOptions,
    ) -> Result<Self> {
        let connection = ConfigResolver::resolve(config)?;
        Ok(Self::new(connection, deps, options))
    }

    pub fn connection(&self) -> &RepositoryConnection {
        &self.connection
    }

    pub fn auth(&self) -> &Arc<AuthSessionManager> {
        &self.auth
    }

    /// Bring a persisted session into memory, once.
    async fn restore_session(&self) {
        if !self.auth.is_authenticated().await {
            self.auth.load_cached_session().await;
        }
    }

    /// Sign in. Interactive connections always run a fresh device flow;
    /// application connections acquire a token with their secret.
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<AccountInfo> {
        if self.connection.auth_method.is_interactive() {
            let session = self.auth.start_device_flow().await?;
            info!(
                account = %redact_if_sensitive("account", &session.account.username),
                "Signed in"
            );
            return Ok(session.account);
        }

        self.auth.get_valid_access_token().await?;
        Ok(self
            .auth
            .current_account()
            .await
            .unwrap_or_else(|| AccountInfo::application(&self.connection.client_id)))
    }

    /// Resolve the repository and read from it.
    #[instrument(skip(self))]
    pub async fn test_connection(&self) -> Result<ResolvedRepository> {
        self.restore_session().await;
        Ok(self.resolver.verify_access().await?)
    }

    /// Session state without network calls, plus an optional access probe.
    pub async fn status(&self, check_connectivity: bool) -> ServiceStatus {
        self.restore_session().await;

        let connectivity = if !check_connectivity {
            None
        } else if self.connection.auth_method.is_interactive() && !self.auth.is_authenticated().await
        {
            Some(Connectivity::SignInRequired)
        } else {
            Some(match self.resolver.verify_access().await {
                Ok(repository) => Connectivity::Reachable(repository),
                Err(e) => Connectivity::Unreachable(e.to_string()),
            })
        };

        ServiceStatus {
            auth: self.auth.status().await,
            repository_address: self.connection.repository_address.clone(),
            library_name: self.connection.library_name.clone(),
            connectivity,
        }
    }

    /// Scan `source` and publish every matching document.
    ///
    /// # Errors
    ///
    /// Only failures that prevent the batch from starting: an invalid target
    /// folder, an unreadable source, or a repository that cannot be resolved.
    /// Per-document failures are reported in the summary.
    pub async fn publish(&self, source: &Path, request: PublishRequest) -> Result<BatchSummary> {
        let root = request
            .target_folder
            .as_deref()
            .map(normalize_folder_path)
            .unwrap_or_else(|| self.connection.root_folder_path.clone());
        validate_folder_path(&root)?;

        let scan = ScanOptions {
            root_folder_path: root,
            default_tags: self.connection.publishing.default_tags.clone(),
            ..ScanOptions::default()
        };
        let source_label = source.display().to_string();
        let documents = scan_directory(source, &scan)?;
        info!(
            source = %strip_path(&source_label),
            documents = documents.len(),
            "Scanned source"
        );

        self.publish_documents(documents, request).await
    }

    /// Publish an already built document set.
    #[instrument(skip_all, fields(documents = documents.len(), dry_run = request.dry_run))]
    pub async fn publish_documents(
        &self,
        documents: Vec<Document>,
        request: PublishRequest,
    ) -> Result<BatchSummary> {
        let options = self.batch_options(&request);

        let uploader: Arc<dyn DocumentUploader> = if options.dry_run || documents.is_empty() {
            if documents.is_empty() {
                warn!("Nothing to publish");
            }
            Arc::new(OfflineUploader)
        } else {
            self.restore_session().await;
            let repository = self.resolver.resolve().await?;
            Arc::new(UploadEngine::new(Arc::clone(self.resolver.client()), repository))
        };

        let mut orchestrator = BatchOrchestrator::new(uploader, options);
        if let Some(progress) = request.progress {
            orchestrator = orchestrator.with_progress(move |done, total| progress(done, total));
        }
        Ok(orchestrator.publish(documents).await)
    }

    /// Forget the session in memory and on disk.
    pub async fn logout(&self) {
        self.auth.sign_out().await;
    }

    fn batch_options(&self, request: &PublishRequest) -> BatchOptions {
        let mut options =
            BatchOptions::from(&self.connection.publishing).with_dry_run(request.dry_run);
        if let Some(concurrency) = request.concurrency {
            options = options.with_concurrency(concurrency);
        }
        if let Some(overwrite) = request.overwrite {
            options = options.with_overwrite(overwrite);
        }
        if let Some(add_metadata) = request.add_metadata {
            options = options.with_metadata(add_metadata);
        }
        options
    }
}

/// Stands in for the upload engine when no remote call may be made.
struct OfflineUploader;

impl OfflineUploader {
    fn refused() -> PublishError {
        PublishError::Internal("remote calls are disabled for this batch".to_string())
    }
}

#[async_trait]
impl DocumentUploader for OfflineUploader {
    async fn ensure_folder(&self, _folder_path: &str) -> core_publish::Result<()> {
        Err(Self::refused())
    }

    async fn upload(
        &self,
        _file_name: &str,
        _content: Bytes,
        _folder_path: &str,
        _conflict: ConflictBehavior,
    ) -> core_publish::Result<UploadedItem> {
        Err(Self::refused())
    }

    async fn attach_metadata(
        &self,
        _item_id: &str,
        _metadata: &BTreeMap<String, Value>,
        _tags: &[String],
    ) -> core_publish::Result<()> {
        Err(Self::refused())
    }
}
