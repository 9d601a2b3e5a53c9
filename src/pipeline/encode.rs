//! Image encoding: `DynamicImage` → JPEG file on disk.
//!
//! JPEG keeps page sets small enough to upload quickly; the quality level is
//! configurable and defaults to 75. Pages are converted to RGB first because
//! the JPEG encoder rejects alpha channels, and pdfium renders BGRA.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageResult};
use std::io::Write;
use tracing::debug;

/// Extension shared by every page file.
pub const PAGE_EXTENSION: &str = "jpg";

/// File name for page `index` of a document whose name stem is `stem`.
///
/// The index is zero-padded to three digits so lexical order matches page
/// order for documents of up to 1000 pages.
pub fn page_file_name(stem: &str, index: usize) -> String {
    format!("{stem}({index:03}).{PAGE_EXTENSION}")
}

/// Recover the page index embedded by [`page_file_name`].
pub fn page_index_from_name(name: &str) -> Option<usize> {
    let body = name.strip_suffix(PAGE_EXTENSION)?.strip_suffix(").")?;
    let open = body.rfind('(')?;
    body[open + 1..].parse().ok()
}

/// Encode `img` as JPEG at `quality` into `out`.
pub fn encode_page<W: Write>(img: &DynamicImage, quality: u8, out: W) -> ImageResult<()> {
    let rgb = img.to_rgb8();
    let mut encoder = JpegEncoder::new_with_quality(out, quality);
    encoder.encode_image(&rgb)?;
    debug!("Encoded {}x{} page as JPEG q{}", rgb.width(), rgb.height(), quality);
    Ok(())
}
