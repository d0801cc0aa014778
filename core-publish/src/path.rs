//! Remote path rules checked locally before any network call.

use crate::error::{PublishError, Result};
use core_runtime::config::{normalize_folder_path, INVALID_PATH_CHARS};

/// Longest server-relative path the repository accepts.
pub const MAX_PATH_LENGTH: usize = 400;

/// Validate a `/`-separated folder path. The empty path is the library root.
///
/// Rejects empty segments (`a//b`), reserved characters, segments ending in
/// a dot or a space, and paths longer than [`MAX_PATH_LENGTH`].
pub fn validate_folder_path(path: &str) -> Result<()> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(());
    }
    if trimmed.chars().count() > MAX_PATH_LENGTH {
        return Err(PublishError::invalid_path(
            path,
            format!("longer than {} characters", MAX_PATH_LENGTH),
        ));
    }
    for segment in trimmed.split('/') {
        validate_segment(path, segment)?;
    }
    Ok(())
}

/// Validate a single file name.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.contains('/') {
        return Err(PublishError::invalid_path(name, "file name contains '/'"));
    }
    validate_segment(name, name)
}

fn validate_segment(path: &str, segment: &str) -> Result<()> {
    if segment.trim().is_empty() {
        return Err(PublishError::invalid_path(path, "empty path segment"));
    }
    if let Some(c) = segment.chars().find(|c| INVALID_PATH_CHARS.contains(c)) {
        return Err(PublishError::invalid_path(
            path,
            format!("'{}' contains reserved character '{}'", segment, c),
        ));
    }
    if segment.ends_with('.') || segment.ends_with(' ') {
        return Err(PublishError::invalid_path(
            path,
            format!("'{}' must not end with a dot or space", segment),
        ));
    }
    Ok(())
}

/// Join folder parts into a normalised `a/b/c` path.
pub fn join_folder(parent: &str, child: &str) -> String {
    normalize_folder_path(&format!("{}/{}", parent, child))
}

/// Full remote path of a file inside a folder.
pub fn remote_file_path(folder: &str, file_name: &str) -> String {
    let folder = normalize_folder_path(folder);
    if folder.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", folder, file_name)
    }
}
