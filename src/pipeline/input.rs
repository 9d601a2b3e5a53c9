//! Input handling: the assembled request and its on-disk materialisation.
//!
//! pdfium opens documents by path, so the in-memory payload is written to a
//! [`NamedTempFile`] first. The file is removed when the handle is dropped,
//! which happens on every exit path of the conversion call. The `%PDF`
//! signature is checked before anything touches the disk so garbage input is
//! rejected cheaply.

use crate::error::ConvertError;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// One fully assembled conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Blob container receiving the pages.
    pub container_name: String,
    /// Folder inside the container, e.g. `invoices/2024/`.
    pub destination_path: String,
    /// Original document name; page files are named after its stem.
    pub file_name: String,
    /// Complete PDF bytes in arrival order.
    pub payload: Vec<u8>,
}

/// Stem used for page file names: last path component, extension stripped.
///
/// Directory components are discarded so a caller-supplied name can never
/// place files outside the scratch directory.
pub fn file_stem(file_name: &str) -> String {
    let last = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let stem = Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if stem.is_empty() || stem == "." || stem == ".." {
        "document".to_string()
    } else {
        stem
    }
}

/// How far into the payload the `%PDF` header may start.
///
/// Readers tolerate junk before the header (BOMs, whitespace, MacBinary
/// prefixes) as long as it appears within the first kilobyte.
pub const SIGNATURE_SCAN_BYTES: usize = 1024;

/// Reject payloads that cannot be a PDF.
pub fn check_signature(payload: &[u8]) -> Result<(), ConvertError> {
    if payload.is_empty() {
        return Err(ConvertError::EmptyPayload);
    }
    let head = &payload[..payload.len().min(SIGNATURE_SCAN_BYTES)];
    if !head.windows(4).any(|w| w == b"%PDF") {
        return Err(ConvertError::NotAPdf {
            magic: payload.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Write `payload` to a uniquely named temp file under `scratch_root`.
///
/// Failing to create the file is a scratch-root problem
/// ([`ConvertError::ScratchDir`]); failing to write it is not.
pub fn materialize(
    file_name: &str,
    payload: &[u8],
    scratch_root: &Path,
) -> Result<NamedTempFile, ConvertError> {
    let prefix = format!("{}-", file_stem(file_name));
    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".pdf")
        .tempfile_in(scratch_root)
        .map_err(|source| ConvertError::ScratchDir {
            root: scratch_root.to_path_buf(),
            source,
        })?;

    file.write_all(payload).map_err(ConvertError::Materialize)?;
    file.flush().map_err(ConvertError::Materialize)?;

    debug!(
        "Materialised {} bytes to {}",
        payload.len(),
        file.path().display()
    );
    Ok(file)
}
