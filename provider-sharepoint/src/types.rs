//! Microsoft Graph response types
//!
//! Only the fields the publisher reads are modelled.

use serde::{Deserialize, Serialize};

/// Site resource
///
/// See: https://learn.microsoft.com/graph/api/resources/site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// Drive (document library) resource
///
/// See: https://learn.microsoft.com/graph/api/resources/drive
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drive {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// Generic `{ "value": [...] }` collection
#[derive(Debug, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// Facet present on folders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u64>,
}

/// DriveItem resource
///
/// See: https://learn.microsoft.com/graph/api/resources/driveitem
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub folder: Option<FolderFacet>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}

/// Body of a folder create request
#[derive(Debug, Serialize)]
pub struct CreateFolderRequest<'a> {
    pub name: &'a str,
    pub folder: FolderFacet,
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: &'static str,
}

/// Body of `createUploadSession`
#[derive(Debug, Serialize)]
pub struct CreateSessionRequest<'a> {
    pub item: SessionItem<'a>,
}

#[derive(Debug, Serialize)]
pub struct SessionItem<'a> {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: &'static str,
    pub name: &'a str,
}

/// Upload session state, returned on creation and on each `202 Accepted`.
///
/// See: https://learn.microsoft.com/graph/api/driveitem-createuploadsession
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub expiration_date_time: Option<String>,
    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}

impl UploadSession {
    /// Start offset of the first range the server still expects.
    pub fn next_offset(&self) -> Option<u64> {
        self.next_expected_ranges
            .first()
            .and_then(|range| range.split('-').next())
            .and_then(|start| start.trim().parse().ok())
    }
}

/// `{ "error": { "code", "message" } }`
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
