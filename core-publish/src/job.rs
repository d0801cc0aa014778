//! # Publish Job State Machine
//!
//! Tracks one document through the upload pipeline.
//!
//! ```text
//! Pending → FolderEnsuring → Uploading → MetadataTagging → Succeeded
//!    ↓            ↓              ↓              ↓
//!    └────────────┴──────────────┴──→ Failed    └──→ Succeeded
//! ```
//!
//! Metadata tagging is optional: `Uploading → Succeeded` is valid. A failure
//! while tagging does not fail the job; the job still ends `Succeeded` with
//! a warning recorded on the result.

use crate::error::{PublishError, Result};
use serde::{Deserialize, Serialize};

/// Stage of a single document's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Pending,
    FolderEnsuring,
    Uploading,
    MetadataTagging,
    Succeeded,
    Failed,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Succeeded | JobStage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::FolderEnsuring => "folder_ensuring",
            JobStage::Uploading => "uploading",
            JobStage::MetadataTagging => "metadata_tagging",
            JobStage::Succeeded => "succeeded",
            JobStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-document job with validated transitions.
#[derive(Debug, Clone)]
pub struct PublishJob {
    /// Position in the batch input
    pub index: usize,
    pub file_name: String,
    pub stage: JobStage,
    /// Last non-terminal stage entered; tells where a failure happened
    pub last_active_stage: JobStage,
}

impl PublishJob {
    pub fn new(index: usize, file_name: impl Into<String>) -> Self {
        Self {
            index,
            file_name: file_name.into(),
            stage: JobStage::Pending,
            last_active_stage: JobStage::Pending,
        }
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::InvalidStateTransition`] for transitions not in
    /// the diagram above, including any transition out of a terminal stage.
    pub fn advance(&mut self, to: JobStage) -> Result<()> {
        use JobStage::*;

        let valid = matches!(
            (self.stage, to),
            (Pending, FolderEnsuring)
                | (Pending, Uploading)
                | (FolderEnsuring, Uploading)
                | (Uploading, MetadataTagging)
                | (Uploading, Succeeded)
                | (MetadataTagging, Succeeded)
                | (Pending | FolderEnsuring | Uploading | MetadataTagging, Failed)
        );

        if !valid {
            return Err(PublishError::InvalidStateTransition {
                from: self.stage.to_string(),
                to: to.to_string(),
            });
        }

        if !to.is_terminal() {
            self.last_active_stage = to;
        }
        self.stage = to;
        Ok(())
    }

    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = JobStage::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pipeline() {
        let mut job = PublishJob::new(0, "a.md");
        job.advance(JobStage::FolderEnsuring).unwrap();
        job.advance(JobStage::Uploading).unwrap();
        job.advance(JobStage::MetadataTagging).unwrap();
        job.advance(JobStage::Succeeded).unwrap();
        assert_eq!(job.stage, JobStage::Succeeded);
        assert_eq!(job.last_active_stage, JobStage::MetadataTagging);
    }

    #[test]
    fn test_metadata_is_optional() {
        let mut job = PublishJob::new(0, "a.md");
        job.advance(JobStage::FolderEnsuring).unwrap();
        job.advance(JobStage::Uploading).unwrap();
        assert!(job.advance(JobStage::Succeeded).is_ok());
    }

    #[test]
    fn test_failure_records_stage() {
        let mut job = PublishJob::new(2, "b.md");
        job.advance(JobStage::FolderEnsuring).unwrap();
        job.advance(JobStage::Uploading).unwrap();
        job.fail();
        assert_eq!(job.stage, JobStage::Failed);
        assert_eq!(job.last_active_stage, JobStage::Uploading);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = PublishJob::new(0, "a.md");
        job.advance(JobStage::Failed).unwrap();
        let err = job.advance(JobStage::Uploading).unwrap_err();
        assert!(matches!(err, PublishError::InvalidStateTransition { .. }));

        job.fail();
        assert_eq!(job.stage, JobStage::Failed);
    }

    #[test]
    fn test_cannot_skip_upload() {
        let mut job = PublishJob::new(0, "a.md");
        job.advance(JobStage::FolderEnsuring).unwrap();
        assert!(job.advance(JobStage::Succeeded).is_err());
        assert!(job.advance(JobStage::MetadataTagging).is_err());
    }
}
