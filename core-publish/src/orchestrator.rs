//! # Batch Orchestrator
//!
//! Runs one publish job per document across a bounded pool of tokio tasks
//! and folds the outcomes into a [`BatchSummary`].
//!
//! ## Guarantees
//!
//! - At most `concurrency` jobs are past the semaphore at any time
//! - A failed or panicking job never affects its siblings
//! - Results are reported in input order regardless of completion order
//! - Dry runs validate paths locally and never touch the uploader
//!
//! ## Usage
//!
//! ```ignore
//! use core_publish::{BatchOptions, BatchOrchestrator};
//!
//! let orchestrator = BatchOrchestrator::new(uploader, BatchOptions::default())
//!     .with_progress(|done, total| eprintln!("{}/{}", done, total));
//! let summary = orchestrator.publish(documents).await;
//! ```

use crate::document::Document;
use crate::error::{PublishError, Result};
use crate::job::{JobStage, PublishJob};
use crate::path::{remote_file_path, validate_file_name, validate_folder_path};
use crate::summary::{BatchSummary, PublishResult};
use crate::uploader::{ConflictBehavior, DocumentUploader};
use core_runtime::config::{PublishingOptions, MAX_CONCURRENCY};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Called after every finished job with `(completed, total)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Per-batch behaviour.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub dry_run: bool,
    pub overwrite: bool,
    pub create_folders: bool,
    pub add_metadata: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&PublishingOptions::default())
    }
}

impl From<&PublishingOptions> for BatchOptions {
    fn from(options: &PublishingOptions) -> Self {
        Self {
            concurrency: options.max_concurrency,
            dry_run: false,
            overwrite: options.overwrite_existing,
            create_folders: options.create_folders,
            add_metadata: options.add_metadata,
        }
    }
}

impl BatchOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_metadata(mut self, add_metadata: bool) -> Self {
        self.add_metadata = add_metadata;
        self
    }

    fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

/// Schedules document jobs over a [`DocumentUploader`].
pub struct BatchOrchestrator {
    uploader: Arc<dyn DocumentUploader>,
    options: BatchOptions,
    progress: Option<ProgressCallback>,
}

impl BatchOrchestrator {
    pub fn new(uploader: Arc<dyn DocumentUploader>, options: BatchOptions) -> Self {
        Self {
            uploader,
            options,
            progress: None,
        }
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Publish every document and report each outcome.
    ///
    /// Never fails as a whole: per-document errors are captured in the
    /// summary. Must be called from within a tokio runtime.
    pub async fn publish(&self, documents: Vec<Document>) -> BatchSummary {
        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        let total = documents.len();
        let concurrency = self.options.effective_concurrency();

        info!(
            batch_id = %batch_id,
            total,
            concurrency,
            dry_run = self.options.dry_run,
            "Starting publish batch"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);
        let mut labels = Vec::with_capacity(total);

        for (index, document) in documents.into_iter().enumerate() {
            labels.push((
                document.file_name.clone(),
                remote_file_path(&document.target_folder_path, &document.file_name),
            ));

            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let uploader = Arc::clone(&self.uploader);
            let options = self.options.clone();
            let progress = self.progress.clone();
            let span = info_span!("publish_document", batch_id = %batch_id, index, file = %document.file_name);

            handles.push(tokio::spawn(
                async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            AssertUnwindSafe(run_job(index, &document, uploader.as_ref(), &options))
                                .catch_unwind()
                                .await
                                .unwrap_or_else(|panic| {
                                    let message = panic_message(panic.as_ref());
                                    error!(panic = %message, "Publish job panicked");
                                    PublishResult::failed(
                                        index,
                                        &document.file_name,
                                        remote_file_path(&document.target_folder_path, &document.file_name),
                                        JobStage::Failed,
                                        &PublishError::Internal(format!("job panicked: {}", message)),
                                    )
                                })
                        }
                        Err(_) => PublishResult::failed(
                            index,
                            &document.file_name,
                            remote_file_path(&document.target_folder_path, &document.file_name),
                            JobStage::Pending,
                            &PublishError::Internal("worker pool closed".to_string()),
                        ),
                    };

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(callback) = progress {
                        callback(done, total);
                    }
                    result
                }
                .instrument(span),
            ));
        }

        let mut results = Vec::with_capacity(total);
        for (index, (handle, (file_name, target_path))) in
            handles.into_iter().zip(labels).enumerate()
        {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(index, error = %e, "Publish task did not complete");
                    results.push(PublishResult::failed(
                        index,
                        &file_name,
                        target_path,
                        JobStage::Failed,
                        &PublishError::Internal(format!("task aborted: {}", e)),
                    ));
                }
            }
        }

        let summary =
            BatchSummary::from_results(batch_id, results, self.options.dry_run, started.elapsed());
        info!(
            batch_id = %batch_id,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Publish batch finished"
        );
        summary
    }
}

/// Drive one document through the job state machine.
async fn run_job(
    index: usize,
    document: &Document,
    uploader: &dyn DocumentUploader,
    options: &BatchOptions,
) -> PublishResult {
    let mut job = PublishJob::new(index, &document.file_name);
    let target_path = remote_file_path(&document.target_folder_path, &document.file_name);

    match execute(&mut job, document, uploader, options).await {
        Ok(result) => result,
        Err(e) => {
            warn!(stage = %job.last_active_stage, error = %e, "Document failed");
            let stage = job.last_active_stage;
            job.fail();
            PublishResult::failed(index, &document.file_name, target_path, stage, &e)
        }
    }
}

async fn execute(
    job: &mut PublishJob,
    document: &Document,
    uploader: &dyn DocumentUploader,
    options: &BatchOptions,
) -> Result<PublishResult> {
    let folder = document.target_folder_path.as_str();
    let target_path = remote_file_path(folder, &document.file_name);

    job.advance(JobStage::FolderEnsuring)?;
    validate_folder_path(folder)?;
    validate_file_name(&document.file_name)?;

    if options.dry_run {
        debug!(path = %target_path, "Dry run: validated");
        job.advance(JobStage::Uploading)?;
        job.advance(JobStage::Succeeded)?;
        return Ok(PublishResult::validated(
            job.index,
            &document.file_name,
            target_path,
            document.size(),
        ));
    }

    if options.create_folders {
        uploader.ensure_folder(folder).await?;
    }

    job.advance(JobStage::Uploading)?;
    let item = uploader
        .upload(
            &document.file_name,
            document.content.clone(),
            folder,
            ConflictBehavior::from_overwrite(options.overwrite),
        )
        .await?;
    debug!(remote_id = %item.id, "Uploaded");
    if item.name != document.file_name {
        info!(remote_name = %item.name, "Repository stored the file under a new name");
    }

    let mut warnings = Vec::new();
    if options.add_metadata && document.has_metadata() {
        job.advance(JobStage::MetadataTagging)?;
        if let Err(e) = uploader
            .attach_metadata(&item.id, &document.metadata, &document.tags)
            .await
        {
            warn!(error = %e, "Metadata update failed; keeping the upload");
            warnings.push(format!("metadata not applied: {}", e));
        }
    }

    job.advance(JobStage::Succeeded)?;
    let mut result = PublishResult::uploaded(
        job.index,
        &document.file_name,
        target_path,
        item,
        document.size(),
    );
    result.warnings = warnings;
    Ok(result)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::UploadedItem;
    use async_trait::async_trait;
    use bytes::Bytes;
    use mockall::mock;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    mock! {
        pub Uploader {}

        #[async_trait]
        impl DocumentUploader for Uploader {
            async fn ensure_folder(&self, folder_path: &str) -> Result<()>;
            async fn upload(
                &self,
                file_name: &str,
                content: Bytes,
                folder_path: &str,
                conflict: ConflictBehavior,
            ) -> Result<UploadedItem>;
            async fn attach_metadata(
                &self,
                item_id: &str,
                metadata: &BTreeMap<String, Value>,
                tags: &[String],
            ) -> Result<()>;
        }
    }

    fn item(name: &str) -> UploadedItem {
        UploadedItem {
            id: format!("id-{}", name),
            name: name.to_string(),
            web_url: Some(format!("https://contoso.example/Docs/{}", name)),
            size: None,
        }
    }

    #[tokio::test]
    async fn test_single_document_pipeline() {
        let mut uploader = MockUploader::new();
        uploader
            .expect_ensure_folder()
            .withf(|path| path == "Docs")
            .times(1)
            .returning(|_| Ok(()));
        uploader
            .expect_upload()
            .withf(|name, content, folder, conflict| {
                name == "readme.md"
                    && content.len() == 4
                    && folder == "Docs"
                    && *conflict == ConflictBehavior::Rename
            })
            .times(1)
            .returning(|name, _, _, _| Ok(item(name)));
        uploader
            .expect_attach_metadata()
            .withf(|id, metadata, tags| {
                id == "id-readme.md" && metadata.contains_key("Title") && tags == ["docs"]
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let orchestrator = BatchOrchestrator::new(Arc::new(uploader), BatchOptions::default());
        let document = Document::new("readme.md", Bytes::from_static(b"# Hi"), "Docs")
            .with_metadata("Title", "readme")
            .with_tags(["docs"]);

        let summary = orchestrator.publish(vec![document]).await;

        assert!(summary.is_success());
        let result = &summary.results[0];
        assert_eq!(result.remote_id.as_deref(), Some("id-readme.md"));
        assert_eq!(result.target_path, "Docs/readme.md");
        assert_eq!(result.size_bytes, Some(4));
        assert_eq!(summary.bytes_uploaded, 4);
    }

    #[tokio::test]
    async fn test_renamed_upload_reports_document_name() {
        let mut uploader = MockUploader::new();
        uploader.expect_ensure_folder().returning(|_| Ok(()));
        uploader
            .expect_upload()
            .times(1)
            .returning(|_, _, _, _| Ok(item("readme 1.md")));
        uploader.expect_attach_metadata().returning(|_, _, _| Ok(()));

        let orchestrator = BatchOrchestrator::new(Arc::new(uploader), BatchOptions::default());
        let summary = orchestrator
            .publish(vec![Document::new("readme.md", Bytes::from_static(b"# Hi"), "Docs")])
            .await;

        let result = &summary.results[0];
        assert!(result.success);
        assert_eq!(result.file_name, "readme.md");
        assert_eq!(result.remote_id.as_deref(), Some("id-readme 1.md"));
        assert_eq!(
            result.remote_url.as_deref(),
            Some("https://contoso.example/Docs/readme 1.md")
        );
    }

    #[tokio::test]
    async fn test_metadata_failure_keeps_upload() {
        let mut uploader = MockUploader::new();
        uploader.expect_ensure_folder().returning(|_| Ok(()));
        uploader
            .expect_upload()
            .returning(|name, _, _, _| Ok(item(name)));
        uploader.expect_attach_metadata().returning(|_, _, _| {
            Err(PublishError::Remote {
                status: 400,
                message: "field Tags does not exist".into(),
            })
        });

        let orchestrator = BatchOrchestrator::new(Arc::new(uploader), BatchOptions::default());
        let document = Document::new("a.md", Bytes::from_static(b"a"), "").with_tags(["x"]);
        let summary = orchestrator.publish(vec![document]).await;

        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.results[0].warnings.len(), 1);
        assert!(summary.results[0].warnings[0].contains("Tags"));
    }

    #[tokio::test]
    async fn test_metadata_disabled_skips_patch() {
        let mut uploader = MockUploader::new();
        uploader.expect_ensure_folder().returning(|_| Ok(()));
        uploader
            .expect_upload()
            .withf(|_, _, _, conflict| *conflict == ConflictBehavior::Replace)
            .returning(|name, _, _, _| Ok(item(name)));
        uploader.expect_attach_metadata().never();

        let options = BatchOptions::default()
            .with_metadata(false)
            .with_overwrite(true);
        let orchestrator = BatchOrchestrator::new(Arc::new(uploader), options);
        let document = Document::new("a.md", Bytes::from_static(b"a"), "").with_tags(["x"]);

        assert!(orchestrator.publish(vec![document]).await.is_success());
    }

    #[tokio::test]
    async fn test_invalid_folder_fails_before_remote_calls() {
        let mut uploader = MockUploader::new();
        uploader.expect_ensure_folder().never();
        uploader.expect_upload().never();

        let orchestrator = BatchOrchestrator::new(Arc::new(uploader), BatchOptions::default());
        let summary = orchestrator
            .publish(vec![Document::new("a.md", Bytes::from_static(b"a"), "bad|folder")])
            .await;

        let result = &summary.results[0];
        assert!(!result.success);
        assert_eq!(result.stage, JobStage::FolderEnsuring);
        assert_eq!(
            result.error_kind,
            Some(crate::error::ErrorKind::Configuration)
        );
    }

    #[tokio::test]
    async fn test_progress_reports_every_job() {
        let mut uploader = MockUploader::new();
        uploader.expect_ensure_folder().returning(|_| Ok(()));
        uploader
            .expect_upload()
            .returning(|name, _, _, _| Ok(item(name)));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let orchestrator = BatchOrchestrator::new(Arc::new(uploader), BatchOptions::default())
            .with_progress(move |done, total| sink.lock().unwrap().push((done, total)));

        let documents = (0..4)
            .map(|i| Document::new(format!("{}.md", i), Bytes::from_static(b"x"), ""))
            .collect();
        orchestrator.publish(documents).await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
    }

    #[test]
    fn test_options_from_publishing_options() {
        let options = BatchOptions::from(&PublishingOptions {
            max_concurrency: 40,
            overwrite_existing: true,
            ..Default::default()
        });
        assert!(options.overwrite);
        assert_eq!(options.effective_concurrency(), MAX_CONCURRENCY);
        assert_eq!(options.with_concurrency(0).effective_concurrency(), 1);
    }
}
