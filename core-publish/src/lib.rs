//! # Publish Module
//!
//! Batch publishing of documents to a remote repository.
//!
//! ## Components
//!
//! - **Documents** (`document`): payload, target folder, metadata; directory scanning
//! - **Path rules** (`path`): local validation of remote folder paths
//! - **Job State Machine** (`job`): per-document stage tracking
//! - **Uploader seam** (`uploader`): the remote operations a job needs
//! - **Orchestrator** (`orchestrator`): bounded worker pool and result aggregation
//! - **Summary** (`summary`): per-document results and batch totals

pub mod document;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod path;
pub mod summary;
pub mod uploader;

pub use document::{scan_directory, Document, ScanOptions, DEFAULT_EXTENSIONS};
pub use error::{ErrorKind, PublishError, Result};
pub use job::{JobStage, PublishJob};
pub use orchestrator::{BatchOptions, BatchOrchestrator, ProgressCallback};
pub use path::{validate_file_name, validate_folder_path, MAX_PATH_LENGTH};
pub use summary::{BatchSummary, PublishResult};
pub use uploader::{ConflictBehavior, DocumentUploader, UploadedItem};
