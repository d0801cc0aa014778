//! Batch results.

use crate::error::{ErrorKind, PublishError};
use crate::job::JobStage;
use crate::uploader::UploadedItem;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Outcome of one document. Exactly one per input document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub index: usize,
    pub success: bool,
    pub file_name: String,
    /// `folder/file` inside the library
    pub target_path: String,
    pub remote_id: Option<String>,
    pub remote_url: Option<String>,
    pub size_bytes: Option<u64>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Stage the job was in when it finished or failed
    pub stage: JobStage,
    /// Non-fatal problems, such as a failed metadata update
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PublishResult {
    /// Successful upload. `file_name` stays the document's own name even when
    /// the repository stored the item under a different one.
    pub fn uploaded(
        index: usize,
        file_name: &str,
        target_path: String,
        item: UploadedItem,
        size: u64,
    ) -> Self {
        Self {
            index,
            success: true,
            file_name: file_name.to_string(),
            target_path,
            remote_id: Some(item.id),
            remote_url: item.web_url,
            size_bytes: Some(item.size.unwrap_or(size)),
            error: None,
            error_kind: None,
            stage: JobStage::Succeeded,
            warnings: Vec::new(),
        }
    }

    /// Successful dry-run result: validated, nothing sent.
    pub fn validated(index: usize, file_name: &str, target_path: String, size: u64) -> Self {
        Self {
            index,
            success: true,
            file_name: file_name.to_string(),
            target_path,
            remote_id: None,
            remote_url: None,
            size_bytes: Some(size),
            error: None,
            error_kind: None,
            stage: JobStage::Succeeded,
            warnings: Vec::new(),
        }
    }

    pub fn failed(
        index: usize,
        file_name: &str,
        target_path: String,
        stage: JobStage,
        error: &PublishError,
    ) -> Self {
        Self {
            index,
            success: false,
            file_name: file_name.to_string(),
            target_path,
            remote_id: None,
            remote_url: None,
            size_bytes: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            stage,
            warnings: Vec::new(),
        }
    }
}

/// Aggregated report of one publish call. Results are in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<PublishResult>,
    pub dry_run: bool,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    pub bytes_uploaded: u64,
}

impl BatchSummary {
    pub fn from_results(
        batch_id: Uuid,
        mut results: Vec<PublishResult>,
        dry_run: bool,
        elapsed: Duration,
    ) -> Self {
        results.sort_by_key(|r| r.index);
        let success_count = results.iter().filter(|r| r.success).count();
        let bytes_uploaded = if dry_run {
            0
        } else {
            results
                .iter()
                .filter(|r| r.success)
                .filter_map(|r| r.size_bytes)
                .sum()
        };

        Self {
            batch_id,
            total_count: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            results,
            dry_run,
            elapsed,
            bytes_uploaded,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &PublishResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// `0` when every document succeeded, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(
            f,
            "Published {}/{} documents{} in {:.1}s, {} failed",
            self.success_count,
            self.total_count,
            mode,
            self.elapsed.as_secs_f64(),
            self.failure_count
        )?;
        for failure in self.failures() {
            writeln!(
                f,
                "  FAILED {}: {}",
                failure.target_path,
                failure.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(index: usize, size: u64) -> PublishResult {
        PublishResult::uploaded(
            index,
            &format!("{}.md", index),
            format!("Docs/{}.md", index),
            UploadedItem {
                id: format!("id-{}", index),
                name: format!("{}.md", index),
                web_url: None,
                size: None,
            },
            size,
        )
    }

    #[test]
    fn test_summary_counts_and_order() {
        let failure = PublishResult::failed(
            1,
            "1.md",
            "Docs/1.md".into(),
            JobStage::Uploading,
            &PublishError::Authentication("token rejected".into()),
        );
        let summary = BatchSummary::from_results(
            Uuid::new_v4(),
            vec![ok(2, 30), failure, ok(0, 10)],
            false,
            Duration::from_millis(1500),
        );

        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failure_count, 1);
        assert_eq!(summary.bytes_uploaded, 40);
        assert_eq!(
            summary.results.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(summary.exit_code(), 1);

        let rendered = summary.to_string();
        assert!(rendered.contains("Published 2/3 documents"));
        assert!(rendered.contains("FAILED Docs/1.md: Authentication error: token rejected"));
    }

    #[test]
    fn test_empty_batch_is_success() {
        let summary =
            BatchSummary::from_results(Uuid::new_v4(), Vec::new(), false, Duration::ZERO);
        assert!(summary.is_success());
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_serialises_camel_case() {
        let summary = BatchSummary::from_results(
            Uuid::new_v4(),
            vec![ok(0, 5)],
            true,
            Duration::from_millis(20),
        );
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["successCount"], 1);
        assert_eq!(json["elapsed"], 20);
        assert_eq!(json["bytesUploaded"], 0);
        assert!(json["results"][0].get("warnings").is_none());
    }
}
