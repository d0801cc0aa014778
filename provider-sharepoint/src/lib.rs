//! # SharePoint Provider
//!
//! Publishes documents into a SharePoint document library through Microsoft
//! Graph.
//!
//! ## Overview
//!
//! This module provides:
//! - A Graph client that attaches a current token and retries once after `401`
//! - Site and library resolution, cached for the process lifetime
//! - Idempotent folder creation
//! - Simple uploads up to 4 MiB and resumable session uploads above that
//! - List-item metadata updates
//!
//! [`UploadEngine`] implements [`core_publish::DocumentUploader`].

pub mod client;
pub mod error;
pub mod resolver;
pub mod types;
pub mod upload;

pub use client::{GraphClient, GRAPH_API_BASE};
pub use error::{GraphError, Result};
pub use resolver::{RepositoryResolver, ResolvedRepository};
pub use types::DriveItem;
pub use upload::{UploadEngine, SIMPLE_UPLOAD_LIMIT, UPLOAD_CHUNK_SIZE};
