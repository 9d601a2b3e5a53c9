//! Storage capability: durably upload a directory of page images.
//!
//! The orchestrator only sees [`BlobStorage`]. Two backends exist:
//!
//! * [`azure::AzureBlobStorage`]: one `Put Blob` request per file,
//!   authorised with a SAS token or Shared Key signing.
//! * [`local::LocalStorage`]: copies into `{root}/{container}/{path}`, for
//!   local runs and development.
//!
//! Backends never delete the source directory; that belongs to the caller.

pub mod azure;
pub mod local;

use crate::config::StorageConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use azure::{AzureBlobStorage, AzureCredential};
pub use local::LocalStorage;

/// Uploads every file of a local directory under a destination path.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Upload each regular file in `local_dir` to
    /// `{container}/{destination}/{file name}`.
    ///
    /// Fails as a whole if any single file fails.
    async fn upload_directory(
        &self,
        container: &str,
        destination: &str,
        local_dir: &Path,
    ) -> Result<(), StorageError>;
}

/// Build the backend selected by `config`.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn BlobStorage>, StorageError> {
    Ok(match config {
        StorageConfig::Local { root } => Arc::new(LocalStorage::new(root.clone())),
        StorageConfig::Azure {
            account,
            sas_token,
            account_key,
            endpoint,
            timeout_secs,
            upload_concurrency,
        } => Arc::new(AzureBlobStorage::new(
            account,
            if account_key.is_empty() {
                AzureCredential::sas(sas_token)
            } else {
                AzureCredential::shared_key(account_key)?
            },
            endpoint.as_deref(),
            Duration::from_secs(*timeout_secs),
            *upload_concurrency,
        )?),
    })
}

/// Validate a container name: one non-empty path segment.
pub(crate) fn check_container(container: &str) -> Result<(), StorageError> {
    if container.is_empty() || container.contains(['/', '\\']) || is_dot_segment(container) {
        return Err(StorageError::InvalidPath(container.to_string()));
    }
    Ok(())
}

/// Split a destination folder into its non-empty segments.
///
/// Leading, trailing and repeated slashes are ignored, so `p/`, `/p` and
/// `p//` all mean the same folder. `.` and `..` are rejected.
pub(crate) fn destination_segments(destination: &str) -> Result<Vec<&str>, StorageError> {
    let segments: Vec<&str> = destination.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| is_dot_segment(s) || s.contains('\\')) {
        return Err(StorageError::InvalidPath(destination.to_string()));
    }
    Ok(segments)
}

/// Full blob name of `file_name` under `destination`, for logs and errors.
pub(crate) fn blob_name(container: &str, segments: &[&str], file_name: &str) -> String {
    let mut parts = Vec::with_capacity(segments.len() + 2);
    parts.push(container);
    parts.extend_from_slice(segments);
    parts.push(file_name);
    parts.join("/")
}

fn is_dot_segment(s: &str) -> bool {
    s == "." || s == ".."
}

/// Regular files directly inside `dir`, sorted by name.
pub(crate) async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let io_err = |source| StorageError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        if entry.file_type().await.map_err(io_err)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Name of a listed file as a UTF-8 string.
pub(crate) fn file_name_of(path: &Path) -> Result<&str, StorageError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))
}
