use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What the repository reports for a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedItem {
    pub id: String,
    pub name: String,
    pub web_url: Option<String>,
    pub size: Option<u64>,
}

/// Replace an existing file or let the repository pick a new name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictBehavior {
    Replace,
    Rename,
}

impl ConflictBehavior {
    pub fn from_overwrite(overwrite: bool) -> Self {
        if overwrite {
            ConflictBehavior::Replace
        } else {
            ConflictBehavior::Rename
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictBehavior::Replace => "replace",
            ConflictBehavior::Rename => "rename",
        }
    }
}

/// Remote operations a publish job needs.
///
/// Implementations obtain a current access token for every call and must be
/// safe to share between concurrent jobs.
#[async_trait]
pub trait DocumentUploader: Send + Sync {
    /// Create every missing segment of `folder_path`. Idempotent.
    async fn ensure_folder(&self, folder_path: &str) -> Result<()>;

    /// Store `content` as `folder_path/file_name`.
    async fn upload(
        &self,
        file_name: &str,
        content: Bytes,
        folder_path: &str,
        conflict: ConflictBehavior,
    ) -> Result<UploadedItem>;

    /// Set list fields on an uploaded item. Best effort from the caller's view.
    async fn attach_metadata(
        &self,
        item_id: &str,
        metadata: &BTreeMap<String, Value>,
        tags: &[String],
    ) -> Result<()>;
}
