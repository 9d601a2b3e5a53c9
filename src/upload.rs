//! Upload orchestration: convert, store, clean up, classify.
//!
//! ```text
//! Received ─▶ Converting ─┬─▶ ConversionFailed
//!                         └─▶ Converted ─▶ Uploading ─┬─▶ Done
//!                                                     └─▶ UploadFailed
//! ```
//!
//! Storage is never touched when conversion fails. Once pages exist, the
//! image directory is removed after the storage call returns, whatever the
//! outcome; if the call never returns (deadline, cancellation, panic) the
//! [`ImageSet`] drop guard removes it instead. No retries happen here.

use crate::convert::{Converter, ImageSet};
use crate::error::{ConvertError, ServiceError};
use crate::pipeline::input::ConversionRequest;
use crate::storage::BlobStorage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Log target for conditions that need operator attention.
pub const ALARM_TARGET: &str = "pdf2images::alarm";

/// Converts PDFs and uploads the page images.
#[derive(Clone)]
pub struct ConversionService {
    converter: Converter,
    storage: Arc<dyn BlobStorage>,
}

impl ConversionService {
    pub fn new(converter: Converter, storage: Arc<dyn BlobStorage>) -> Self {
        Self { converter, storage }
    }

    /// Convert `request.payload` and upload the pages to
    /// `{container_name}/{destination_path}`.
    ///
    /// Low-level failures are logged here in full and replaced by a
    /// [`ServiceError`] kind.
    pub async fn convert_and_upload(
        &self,
        request: ConversionRequest,
        deadline: Option<Instant>,
    ) -> Result<(), ServiceError> {
        let ConversionRequest {
            container_name,
            destination_path,
            file_name,
            payload,
        } = request;

        let span = info_span!(
            "convert_and_upload",
            container = %container_name,
            destination = %destination_path,
            file_name = %file_name,
            payload_bytes = payload.len(),
        );

        async move {
            let started = Instant::now();
            let images = self
                .converter
                .convert_blocking_task(file_name, payload, deadline)
                .await
                .map_err(classify_conversion_error)?;
            info!(
                pages = images.page_count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "conversion finished"
            );

            let started = Instant::now();
            let uploaded = self
                .storage
                .upload_directory(&container_name, &destination_path, images.path())
                .await;
            remove_images(images).await;

            match uploaded {
                Ok(()) => {
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "upload finished"
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "error occurred while uploading images");
                    Err(ServiceError::UploadFailed)
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn classify_conversion_error(e: ConvertError) -> ServiceError {
    let kind = ServiceError::from(&e);
    match kind {
        ServiceError::Environment => error!(
            target: ALARM_TARGET,
            alarm = true,
            error = %e,
            "scratch space unavailable; this host cannot serve conversions"
        ),
        ServiceError::DeadlineExceeded => warn!(error = %e, "conversion abandoned"),
        _ => error!(error = %e, "error occurred while converting .pdf file"),
    }
    kind
}

async fn remove_images(images: ImageSet) {
    let path = images.path().to_path_buf();
    if let Err(e) = images.remove().await {
        warn!(path = %path.display(), error = %e, "failed to remove image directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::convert::tests::FakeRenderer;
    use crate::error::StorageError;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStorage {
        fail: bool,
        panic: bool,
        calls: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    #[async_trait]
    impl BlobStorage for RecordingStorage {
        async fn upload_directory(
            &self,
            container: &str,
            destination: &str,
            local_dir: &Path,
        ) -> Result<(), StorageError> {
            let mut names: Vec<String> = std::fs::read_dir(local_dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            self.calls
                .lock()
                .unwrap()
                .push((container.into(), destination.into(), names));

            if self.panic {
                panic!("storage client blew up");
            }
            if self.fail {
                return Err(StorageError::Status {
                    blob: "c1/p/doc(000).jpg".into(),
                    status: 500,
                    body: "InternalError".into(),
                });
            }
            Ok(())
        }
    }

    fn service(root: &Path, fail_on: Option<usize>, storage: Arc<RecordingStorage>) -> ConversionService {
        let config = ServiceConfig::builder().scratch_dir(root).build().unwrap();
        let converter = Converter::new(Arc::new(FakeRenderer { fail_on }), &config);
        ConversionService::new(converter, storage)
    }

    fn request(payload: &[u8]) -> ConversionRequest {
        ConversionRequest {
            container_name: "c1".into(),
            destination_path: "p/".into(),
            file_name: "doc.pdf".into(),
            payload: payload.to_vec(),
        }
    }

    fn leftovers(root: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[tokio::test]
    async fn uploads_pages_then_removes_them() {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(RecordingStorage::default());
        service(root.path(), None, storage.clone())
            .convert_and_upload(request(b"%PDF pages=3"), None)
            .await
            .unwrap();

        let calls = storage.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (container, destination, names) = &calls[0];
        assert_eq!(container, "c1");
        assert_eq!(destination, "p/");
        assert_eq!(names, &["doc(000).jpg", "doc(001).jpg", "doc(002).jpg"]);
        assert!(leftovers(root.path()).is_empty());
    }

    #[tokio::test]
    async fn conversion_failure_never_reaches_storage() {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(RecordingStorage::default());
        let svc = service(root.path(), Some(1), storage.clone());

        let err = svc
            .convert_and_upload(request(b"%PDF pages=3"), None)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::ConversionFailed);

        let err = svc.convert_and_upload(request(b""), None).await.unwrap_err();
        assert_eq!(err, ServiceError::ConversionFailed);

        assert!(storage.calls.lock().unwrap().is_empty());
        assert!(leftovers(root.path()).is_empty());
    }

    #[tokio::test]
    async fn storage_failure_is_upload_failed_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(RecordingStorage {
            fail: true,
            ..Default::default()
        });
        let err = service(root.path(), None, storage.clone())
            .convert_and_upload(request(b"%PDF pages=2"), None)
            .await
            .unwrap_err();

        assert_eq!(err, ServiceError::UploadFailed);
        assert_eq!(
            err.to_string(),
            ".pdf file was converted but not uploaded",
            "storage detail must not leak"
        );
        assert_eq!(storage.calls.lock().unwrap().len(), 1);
        assert!(leftovers(root.path()).is_empty());
    }

    #[tokio::test]
    async fn panicking_storage_still_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(RecordingStorage {
            panic: true,
            ..Default::default()
        });
        let svc = service(root.path(), None, storage);

        let joined = tokio::spawn(async move {
            svc.convert_and_upload(request(b"%PDF pages=2"), None).await
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert!(leftovers(root.path()).is_empty());
    }

    #[tokio::test]
    async fn unusable_scratch_root_is_an_environment_failure() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("gone");
        let storage = Arc::new(RecordingStorage::default());
        let err = service(&missing, None, storage.clone())
            .convert_and_upload(request(b"%PDF pages=1"), None)
            .await
            .unwrap_err();

        assert_eq!(err, ServiceError::Environment);
        assert_eq!(tonic::Status::from(err).code(), tonic::Code::Internal);
        assert!(storage.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_deadline_is_classified() {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(RecordingStorage::default());
        let err = service(root.path(), None, storage.clone())
            .convert_and_upload(request(b"%PDF pages=2"), Some(Instant::now()))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::DeadlineExceeded);
        assert!(storage.calls.lock().unwrap().is_empty());
    }
}
