//! # Documents
//!
//! A [`Document`] is an opaque payload plus where it goes and what to tag it
//! with. Documents come from the content pipeline or from
//! [`scan_directory`], which walks a local tree.

use crate::error::{PublishError, Result};
use crate::path::join_folder;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// Extensions picked up by a directory scan when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "pdf", "docx", "doc", "xlsx", "pptx", "html", "htm", "csv", "json",
];

/// A document to publish. Immutable once built.
#[derive(Clone, PartialEq)]
pub struct Document {
    pub title: String,
    pub content: Bytes,
    pub file_name: String,
    /// Folder relative to the library root, `a/b` form
    pub target_folder_path: String,
    pub metadata: BTreeMap<String, Value>,
    pub tags: Vec<String>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("title", &self.title)
            .field("file_name", &self.file_name)
            .field("target_folder_path", &self.target_folder_path)
            .field("size", &self.content.len())
            .field("tags", &self.tags)
            .finish()
    }
}

impl Document {
    pub fn new(
        file_name: impl Into<String>,
        content: impl Into<Bytes>,
        target_folder_path: impl Into<String>,
    ) -> Self {
        let file_name = file_name.into();
        Self {
            title: file_stem(&file_name).to_string(),
            content: content.into(),
            file_name,
            target_folder_path: target_folder_path.into(),
            metadata: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn has_metadata(&self) -> bool {
        !self.metadata.is_empty() || !self.tags.is_empty()
    }
}

fn file_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

/// How a local tree maps onto documents.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lower-case extensions without the dot
    pub extensions: Vec<String>,
    /// Remote folder the scanned tree is placed under
    pub root_folder_path: String,
    pub default_tags: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            root_folder_path: String::new(),
            default_tags: Vec::new(),
        }
    }
}

impl ScanOptions {
    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| self.extensions.iter().any(|x| x == &e))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// Walk `source` and build one document per matching file.
///
/// A single file is accepted too; it is placed directly in the root folder.
/// Hidden files and directories are skipped. Documents are ordered by their
/// relative path so the batch order is stable.
pub fn scan_directory(source: &Path, options: &ScanOptions) -> Result<Vec<Document>> {
    if !source.exists() {
        return Err(PublishError::NotFound {
            resource: source.display().to_string(),
        });
    }

    let mut documents = Vec::new();
    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !options.accepts(entry.path()) {
            continue;
        }

        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let relative_parent = relative
            .parent()
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();

        let file_name = entry.file_name().to_string_lossy().into_owned();
        let content = std::fs::read(entry.path())?;
        let folder = join_folder(&options.root_folder_path, &relative_parent);

        debug!(file = %file_name, folder = %folder, size = content.len(), "Discovered document");

        let document = Document::new(file_name, content, folder).with_tags(options.default_tags.iter().cloned());
        let title = document.title.clone();
        documents.push(document.with_metadata("Title", title));
    }

    documents.sort_by(|a, b| {
        (a.target_folder_path.as_str(), a.file_name.as_str())
            .cmp(&(b.target_folder_path.as_str(), b.file_name.as_str()))
    });

    info!(count = documents.len(), "Scanned source for documents");
    Ok(documents)
}
