//! Error types for the pdf2images service.
//!
//! Errors are layered. Each capability reports what actually went wrong:
//!
//! * [`RenderError`]: the rendering backend could not open or rasterise.
//! * [`ConvertError`]: the conversion pipeline failed; carries the page
//!   index and the underlying I/O, codec or rendering detail.
//! * [`StorageError`]: the blob store rejected or could not receive a file.
//!
//! None of these cross the service boundary. The orchestrator logs the full
//! detail and replaces it with a [`ServiceError`], a small closed set of
//! caller-visible kinds that is then turned into a [`tonic::Status`].

use std::path::PathBuf;
use thiserror::Error;
use tonic::{Code, Status};

/// Errors reported by a [`crate::pipeline::render::Renderer`].
#[derive(Debug, Error)]
pub enum RenderError {
    /// The backend library could not be loaded.
    #[error("failed to bind rendering library: {0}")]
    Binding(String),

    /// The file could not be parsed as a PDF.
    #[error("cannot open '{path}': {detail}")]
    Open { path: PathBuf, detail: String },

    /// A single page could not be rasterised.
    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },
}

/// Failures of one conversion call.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The payload has no bytes at all.
    #[error("payload is empty")]
    EmptyPayload,

    /// The payload does not start with the `%PDF` signature.
    #[error("payload is not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The payload could not be written to a scratch file.
    #[error("failed to materialise payload: {0}")]
    Materialize(#[source] std::io::Error),

    /// The renderer rejected the document.
    #[error("failed to open document: {0}")]
    Open(#[source] RenderError),

    /// The document opened but has no pages to convert.
    #[error("document has no pages")]
    EmptyDocument,

    /// A scratch file or the output directory could not be created. The
    /// host is out of scratch space or the scratch root is unusable.
    #[error("failed to allocate scratch space under '{root}': {source}")]
    ScratchDir {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rasterisation failed: {0}")]
    Render(#[source] RenderError),

    #[error("JPEG encoding failed for page {page}: {source}")]
    Encode {
        page: usize,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write page {page} to '{path}': {source}")]
    Write {
        page: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The call deadline passed before all pages were rendered.
    #[error("deadline exceeded after {pages_done} pages")]
    DeadlineExceeded { pages_done: usize },

    /// The blocking conversion task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures of a [`crate::storage::BlobStorage`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A local file could not be read or written.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP request did not complete.
    #[error("request for blob '{blob}' failed: {source}")]
    Request {
        blob: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status.
    #[error("blob '{blob}' rejected with HTTP {status}: {body}")]
    Status {
        blob: String,
        status: u16,
        body: String,
    },

    /// Container or destination path cannot be mapped onto the store.
    #[error("invalid blob path '{0}'")]
    InvalidPath(String),

    /// The backend could not be constructed from its configuration.
    #[error("storage backend misconfigured: {0}")]
    Config(String),
}

/// Caller-visible failure kinds.
///
/// Deliberately coarse: the detailed cause is logged where it happens and
/// never leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The payload could not be parsed, has no pages, or a page failed to
    /// render, encode or write.
    #[error(".pdf file not converted")]
    ConversionFailed,

    /// The pages were rasterised but the upload did not complete.
    #[error(".pdf file was converted but not uploaded")]
    UploadFailed,

    /// The host could not allocate scratch space.
    #[error("conversion host cannot allocate scratch space")]
    Environment,

    /// The call deadline expired while work was in progress.
    #[error("deadline exceeded before conversion completed")]
    DeadlineExceeded,
}

impl ServiceError {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ServiceError::UploadFailed | ServiceError::DeadlineExceeded)
    }

    /// gRPC status code for this kind.
    pub fn code(self) -> Code {
        match self {
            ServiceError::ConversionFailed => Code::InvalidArgument,
            ServiceError::UploadFailed => Code::Unavailable,
            ServiceError::Environment => Code::Internal,
            ServiceError::DeadlineExceeded => Code::DeadlineExceeded,
        }
    }
}

impl From<&ConvertError> for ServiceError {
    fn from(e: &ConvertError) -> Self {
        match e {
            ConvertError::ScratchDir { .. } => ServiceError::Environment,
            ConvertError::DeadlineExceeded { .. } => ServiceError::DeadlineExceeded,
            _ => ServiceError::ConversionFailed,
        }
    }
}

impl From<ServiceError> for Status {
    fn from(e: ServiceError) -> Self {
        Status::new(e.code(), e.to_string())
    }
}

/// Invalid service configuration.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
