//! # Upload Engine
//!
//! Single-document transfers into a resolved document library.
//!
//! ## Strategy
//!
//! | Payload size            | Transfer                                         |
//! |-------------------------|--------------------------------------------------|
//! | `<= 4 MiB`              | one `PUT .../content`                            |
//! | `> 4 MiB`               | upload session, sequential 320 KiB range chunks  |
//!
//! A session upload is complete only when the chunk ending at the last byte
//! is answered with the created item. Anything else is an
//! [`GraphError::IncompleteUpload`] and the session is cancelled.
//!
//! ## Folders
//!
//! [`UploadEngine::ensure_folder`] walks the path one segment at a time,
//! checking before creating. Ensured paths are remembered for the life of
//! the engine, and a per-path lock makes concurrent callers for the same
//! path wait for the first one instead of racing it.

use crate::client::{encode_path, ensure_success, parse, GraphClient};
use crate::error::{GraphError, Result};
use crate::resolver::ResolvedRepository;
use crate::types::{
    CreateFolderRequest, CreateSessionRequest, DriveItem, FolderFacet, SessionItem, UploadSession,
};
use async_trait::async_trait;
use bridge_traits::http::{HttpMethod, HttpRequest};
use bytes::Bytes;
use core_publish::{ConflictBehavior, DocumentUploader, PublishError, UploadedItem};
use core_runtime::config::normalize_folder_path;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Largest payload sent in a single request (4 MiB).
pub const SIMPLE_UPLOAD_LIMIT: usize = 4 * 1024 * 1024;

/// Session chunk size. Graph requires multiples of 320 KiB.
pub const UPLOAD_CHUNK_SIZE: usize = 320 * 1024;

const CHUNK_TIMEOUT: Duration = Duration::from_secs(180);

pub struct UploadEngine {
    client: Arc<GraphClient>,
    repository: ResolvedRepository,
    ensured: Mutex<HashSet<String>>,
    folder_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UploadEngine {
    pub fn new(client: Arc<GraphClient>, repository: ResolvedRepository) -> Self {
        Self {
            client,
            repository,
            ensured: Mutex::new(HashSet::new()),
            folder_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &ResolvedRepository {
        &self.repository
    }

    fn drive_path(&self, suffix: &str) -> String {
        format!("/drives/{}{}", self.repository.drive_id, suffix)
    }

    /// `/drives/{d}/root:/{path}:` for an item addressed by path.
    fn item_path(&self, path: &str) -> String {
        self.drive_path(&format!("/root:/{}:", encode_path(path)))
    }

    // ========================================================================
    // Folders
    // ========================================================================

    /// Create every missing segment of `folder_path`.
    #[instrument(skip(self))]
    pub async fn ensure_folder(&self, folder_path: &str) -> Result<()> {
        let normalized = normalize_folder_path(folder_path);
        if normalized.is_empty() || self.is_ensured(&normalized) {
            return Ok(());
        }

        let mut parent = String::new();
        for segment in normalized.split('/') {
            let full = if parent.is_empty() {
                segment.to_string()
            } else {
                format!("{}/{}", parent, segment)
            };
            self.ensure_segment(&parent, segment, &full).await?;
            parent = full;
        }
        Ok(())
    }

    fn is_ensured(&self, path: &str) -> bool {
        self.ensured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    fn folder_lock(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.folder_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(path.to_string()).or_default())
    }

    async fn ensure_segment(&self, parent: &str, name: &str, full: &str) -> Result<()> {
        if self.is_ensured(full) {
            return Ok(());
        }

        let lock = self.folder_lock(full);
        let _guard = lock.lock().await;
        if self.is_ensured(full) {
            return Ok(());
        }

        let response = self
            .client
            .execute(self.client.request(HttpMethod::Get, &self.item_path(full)))
            .await?;

        match response.status {
            404 => self.create_folder(parent, name, full).await?,
            _ => {
                let response = ensure_success(response, &format!("folder '{}'", full))?;
                let item: DriveItem = parse(&response)?;
                if !item.is_folder() {
                    return Err(GraphError::Conflict(format!(
                        "'{}' exists and is not a folder",
                        full
                    )));
                }
                debug!(folder = %full, "Folder exists");
            }
        }

        self.ensured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(full.to_string());
        Ok(())
    }

    async fn create_folder(&self, parent: &str, name: &str, full: &str) -> Result<()> {
        let path = if parent.is_empty() {
            self.drive_path("/root/children")
        } else {
            format!("{}/children", self.item_path(parent))
        };

        let request = self
            .client
            .request(HttpMethod::Post, &path)
            .json(&CreateFolderRequest {
                name,
                folder: FolderFacet::default(),
                conflict_behavior: "fail",
            })?;
        let response = self.client.execute(request).await?;

        if response.status == 409 {
            debug!(folder = %full, "Folder created concurrently elsewhere");
            return Ok(());
        }
        ensure_success(response, &format!("folder '{}'", full))?;
        info!(folder = %full, "Created folder");
        Ok(())
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Upload `content` as `folder_path/file_name`, choosing the transfer by size.
    #[instrument(skip(self, content), fields(size = content.len()))]
    pub async fn upload(
        &self,
        file_name: &str,
        content: Bytes,
        folder_path: &str,
        conflict: ConflictBehavior,
    ) -> Result<DriveItem> {
        let folder = normalize_folder_path(folder_path);
        let path = if folder.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", folder, file_name)
        };

        if content.len() <= SIMPLE_UPLOAD_LIMIT {
            self.simple_upload(&path, content, conflict).await
        } else {
            self.session_upload(&path, file_name, content, conflict).await
        }
    }

    async fn simple_upload(
        &self,
        path: &str,
        content: Bytes,
        conflict: ConflictBehavior,
    ) -> Result<DriveItem> {
        let url_path = format!(
            "{}/content?@microsoft.graph.conflictBehavior={}",
            self.item_path(path),
            conflict.as_str()
        );
        let request = self
            .client
            .request(HttpMethod::Put, &url_path)
            .header("Content-Type", "application/octet-stream")
            .body(content);

        let response = self.client.execute(request).await?;
        let response = ensure_success(response, &format!("file '{}'", path))?;
        let item: DriveItem = parse(&response)?;
        info!(path = %path, item_id = %item.id, "Uploaded file");
        Ok(item)
    }

    async fn session_upload(
        &self,
        path: &str,
        file_name: &str,
        content: Bytes,
        conflict: ConflictBehavior,
    ) -> Result<DriveItem> {
        let request = self
            .client
            .request(
                HttpMethod::Post,
                &format!("{}/createUploadSession", self.item_path(path)),
            )
            .json(&CreateSessionRequest {
                item: SessionItem {
                    conflict_behavior: conflict.as_str(),
                    name: file_name,
                },
            })?;
        let response = self.client.execute(request).await?;
        let response = ensure_success(response, &format!("upload session for '{}'", path))?;
        let session: UploadSession = parse(&response)?;
        let upload_url = session
            .upload_url
            .ok_or_else(|| GraphError::Parse("upload session has no uploadUrl".to_string()))?;

        debug!(path = %path, total = content.len(), "Upload session created");

        match self.send_chunks(&upload_url, &content).await {
            Ok(item) => {
                info!(path = %path, item_id = %item.id, "Uploaded file in chunks");
                Ok(item)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Chunked upload failed, cancelling session");
                self.cancel_session(&upload_url).await;
                Err(e)
            }
        }
    }

    /// Send every range in order. Only the range covering the last byte may
    /// complete the upload.
    async fn send_chunks(&self, upload_url: &str, content: &Bytes) -> Result<DriveItem> {
        let total = content.len();
        let last_byte = total - 1;
        let max_requests = total.div_ceil(UPLOAD_CHUNK_SIZE) * 2 + 2;
        let mut offset = 0usize;

        for _ in 0..max_requests {
            let end = (offset + UPLOAD_CHUNK_SIZE).min(total) - 1;
            let request = HttpRequest::new(HttpMethod::Put, upload_url)
                .header("Content-Range", format!("bytes {}-{}/{}", offset, end, total))
                .header("Content-Type", "application/octet-stream")
                .timeout(CHUNK_TIMEOUT)
                .body(content.slice(offset..=end));

            let response = self.client.execute_anonymous(request).await?;
            match response.status {
                200 | 201 => {
                    if end != last_byte {
                        return Err(GraphError::IncompleteUpload(format!(
                            "item returned after bytes {}-{} of {}",
                            offset, end, total
                        )));
                    }
                    return parse(&response);
                }
                202 => {
                    if end == last_byte {
                        return Err(GraphError::IncompleteUpload(
                            "final chunk accepted without a completed item".to_string(),
                        ));
                    }
                    let progress: UploadSession = parse(&response)?;
                    let next = progress
                        .next_offset()
                        .map(|n| n as usize)
                        .unwrap_or(end + 1);
                    if next > last_byte {
                        return Err(GraphError::IncompleteUpload(format!(
                            "server expects offset {} beyond {} bytes",
                            next, total
                        )));
                    }
                    debug!(sent_to = end, next, total, "Chunk accepted");
                    offset = next;
                }
                _ => {
                    ensure_success(response, "upload chunk")?;
                    return Err(GraphError::IncompleteUpload(
                        "unexpected chunk response".to_string(),
                    ));
                }
            }
        }

        Err(GraphError::IncompleteUpload(format!(
            "no completion after {} chunk requests",
            max_requests
        )))
    }

    async fn cancel_session(&self, upload_url: &str) {
        let request = HttpRequest::new(HttpMethod::Delete, upload_url);
        match self.client.execute_anonymous(request).await {
            Ok(response) if response.is_success() => debug!("Upload session cancelled"),
            Ok(response) => debug!(status = response.status, "Session cancel not acknowledged"),
            Err(e) => debug!(error = %e, "Session cancel failed"),
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Write list-item fields. `tags` go into the `Tags` field, `;`-separated.
    #[instrument(skip(self, metadata, tags))]
    pub async fn attach_metadata(
        &self,
        item_id: &str,
        metadata: &BTreeMap<String, Value>,
        tags: &[String],
    ) -> Result<()> {
        let mut fields: Map<String, Value> = metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !tags.is_empty() {
            fields.insert("Tags".to_string(), Value::String(tags.join(";")));
        }
        if fields.is_empty() {
            return Ok(());
        }

        let request = self
            .client
            .request(
                HttpMethod::Patch,
                &self.drive_path(&format!("/items/{}/listItem/fields", item_id)),
            )
            .json(&Value::Object(fields))?;
        let response = self.client.execute(request).await?;
        ensure_success(response, &format!("list item for {}", item_id))?;
        debug!(item_id, "Metadata applied");
        Ok(())
    }
}

#[async_trait]
impl DocumentUploader for UploadEngine {
    async fn ensure_folder(&self, folder_path: &str) -> core_publish::Result<()> {
        UploadEngine::ensure_folder(self, folder_path)
            .await
            .map_err(PublishError::from)
    }

    async fn upload(
        &self,
        file_name: &str,
        content: Bytes,
        folder_path: &str,
        conflict: ConflictBehavior,
    ) -> core_publish::Result<UploadedItem> {
        let size = content.len() as u64;
        let item = UploadEngine::upload(self, file_name, content, folder_path, conflict).await?;
        Ok(UploadedItem {
            id: item.id,
            name: if item.name.is_empty() {
                file_name.to_string()
            } else {
                item.name
            },
            web_url: item.web_url,
            size: item.size.or(Some(size)),
        })
    }

    async fn attach_metadata(
        &self,
        item_id: &str,
        metadata: &BTreeMap<String, Value>,
        tags: &[String],
    ) -> core_publish::Result<()> {
        UploadEngine::attach_metadata(self, item_id, metadata, tags)
            .await
            .map_err(PublishError::from)
    }
}
