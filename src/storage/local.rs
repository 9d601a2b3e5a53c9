//! Filesystem-backed blob store.
//!
//! Mirrors the blob layout on disk: `{root}/{container}/{destination}/{file}`.
//! Used for the `local` environment and for running the service without
//! cloud credentials.

use super::{check_container, destination_segments, file_name_of, list_files, BlobStorage};
use crate::error::StorageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn upload_directory(
        &self,
        container: &str,
        destination: &str,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        check_container(container)?;
        let mut target = self.root.join(container);
        target.extend(destination_segments(destination)?);

        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|source| StorageError::Io {
                path: target.clone(),
                source,
            })?;

        for file in list_files(local_dir).await? {
            let dest = target.join(file_name_of(&file)?);
            tokio::fs::copy(&file, &dest)
                .await
                .map_err(|source| StorageError::Io {
                    path: dest.clone(),
                    source,
                })?;
            debug!("Stored {}", dest.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_files_under_container_and_path() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("doc(000).jpg"), b"one").unwrap();
        std::fs::write(src.path().join("doc(001).jpg"), b"two").unwrap();

        let root = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(root.path());
        store
            .upload_directory("c1", "p/q/", src.path())
            .await
            .unwrap();

        let out = root.path().join("c1/p/q");
        assert_eq!(std::fs::read(out.join("doc(000).jpg")).unwrap(), b"one");
        assert_eq!(std::fs::read(out.join("doc(001).jpg")).unwrap(), b"two");
        // Source is left for the caller to clean up.
        assert!(src.path().join("doc(000).jpg").exists());
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(root.path());

        let err = store
            .upload_directory("c1", "../outside", src.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn missing_source_directory_is_an_io_error() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(root.path());
        let err = store
            .upload_directory("c1", "p", &root.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }
}
