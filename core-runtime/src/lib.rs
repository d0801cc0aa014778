//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the document publisher:
//! - Configuration contract, environment overrides and validation
//!   ([`config::ConfigResolver`])
//! - Logging and tracing bootstrap ([`logging::init_logging`])

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AuthMethod, ConfigIssue, ConfigResolver, CredentialMaterial, PublisherConfig,
    PublishingOptions, RepositoryConnection, ValidationReport,
};
pub use error::{Error, Result};
