//! The conversion pipeline: PDF bytes in, a directory of JPEG pages out.
//!
//! Everything on disk is scoped. The input is a `NamedTempFile` removed when
//! [`Converter::convert`] returns; the output is an [`ImageSet`] that owns a
//! `TempDir` and removes it on [`ImageSet::cleanup`] or drop, whichever comes
//! first. An error part-way through the page loop drops the half-filled
//! directory before the error is returned, so no partial page set ever
//! escapes.

use crate::config::ServiceConfig;
use crate::error::ConvertError;
use crate::pipeline::render::Renderer;
use crate::pipeline::{encode, input};
use image::DynamicImage;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info};

/// Prefix of every output directory created under the scratch root.
pub const IMAGE_DIR_PREFIX: &str = "pdf2images-";

/// A converted document: one JPEG per page in a private temp directory.
///
/// The directory is deleted exactly once: by [`ImageSet::cleanup`], or by
/// `Drop` if cleanup never ran.
#[derive(Debug)]
pub struct ImageSet {
    dir: Option<TempDir>,
    path: PathBuf,
    pages: Vec<PathBuf>,
}

impl ImageSet {
    /// Directory holding the page files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page files in page order.
    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Delete the directory and its contents. Later calls are no-ops.
    pub fn cleanup(&mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }

    /// [`ImageSet::cleanup`] on the blocking thread pool.
    ///
    /// The removal still completes if the awaiting future is dropped.
    pub async fn remove(mut self) -> io::Result<()> {
        tokio::task::spawn_blocking(move || self.cleanup())
            .await
            .map_err(io::Error::other)?
    }
}

/// Rasterises PDF payloads into [`ImageSet`]s.
#[derive(Clone)]
pub struct Converter {
    renderer: Arc<dyn Renderer>,
    jpeg_quality: u8,
    scratch_root: PathBuf,
}

impl Converter {
    pub fn new(renderer: Arc<dyn Renderer>, config: &ServiceConfig) -> Self {
        Self {
            renderer,
            jpeg_quality: config.jpeg_quality,
            scratch_root: config.scratch_root(),
        }
    }

    /// Convert `payload` into one JPEG per page.
    ///
    /// Pages are rendered strictly in ascending order. The first failing page
    /// aborts the whole conversion. When `deadline` is set it is checked
    /// before each page.
    pub fn convert(
        &self,
        file_name: &str,
        payload: &[u8],
        deadline: Option<Instant>,
    ) -> Result<ImageSet, ConvertError> {
        input::check_signature(payload)?;
        let source = input::materialize(file_name, payload, &self.scratch_root)?;

        let document = self
            .renderer
            .open(source.path())
            .map_err(ConvertError::Open)?;
        let page_count = document.page_count();
        if page_count == 0 {
            return Err(ConvertError::EmptyDocument);
        }

        let dir = tempfile::Builder::new()
            .prefix(IMAGE_DIR_PREFIX)
            .tempdir_in(&self.scratch_root)
            .map_err(|source| ConvertError::ScratchDir {
                root: self.scratch_root.clone(),
                source,
            })?;

        let stem = input::file_stem(file_name);
        let mut pages = Vec::with_capacity(page_count);

        for index in 0..page_count {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ConvertError::DeadlineExceeded { pages_done: index });
            }

            let image = document.render_page(index).map_err(ConvertError::Render)?;
            let path = dir.path().join(encode::page_file_name(&stem, index));
            write_page(&image, self.jpeg_quality, &path, index)?;
            pages.push(path);
        }

        info!(
            "Converted '{}' into {} pages at {}",
            file_name,
            page_count,
            dir.path().display()
        );

        Ok(ImageSet {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
            pages,
        })
    }

    /// Run [`Converter::convert`] on the blocking thread pool.
    ///
    /// pdfium is CPU-bound and not async-safe. If the awaiting future is
    /// dropped the task still runs to completion and its scoped files are
    /// removed when it finishes.
    pub async fn convert_blocking_task(
        &self,
        file_name: String,
        payload: Vec<u8>,
        deadline: Option<Instant>,
    ) -> Result<ImageSet, ConvertError> {
        let converter = self.clone();
        tokio::task::spawn_blocking(move || converter.convert(&file_name, &payload, deadline))
            .await
            .map_err(|e| ConvertError::Internal(format!("conversion task failed: {e}")))?
    }
}

fn write_page(
    image: &DynamicImage,
    quality: u8,
    path: &Path,
    page: usize,
) -> Result<(), ConvertError> {
    let write_err = |source| ConvertError::Write {
        page,
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(write_err)?;
    let mut out = BufWriter::new(file);
    encode::encode_page(image, quality, &mut out)
        .map_err(|source| ConvertError::Encode { page, source })?;
    out.flush().map_err(write_err)?;

    debug!("Wrote page {} to {}", page, path.display());
    Ok(())
}
