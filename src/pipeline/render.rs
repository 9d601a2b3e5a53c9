//! Rendering capability: open a PDF and rasterise its pages one at a time.
//!
//! The pipeline only sees the [`Renderer`] and [`RenderedDocument`] traits,
//! so tests can substitute a fake without loading pdfium. Closing a document
//! is dropping it.
//!
//! ## Why one shared `Pdfium`?
//!
//! Binding loads the shared library and initialises pdfium's global state.
//! [`PdfiumRenderer`] binds once at startup and is shared behind an `Arc`;
//! pdfium-render's `thread_safe` feature serialises the FFI calls, and the
//! `sync` feature lets the binding cross into `spawn_blocking` tasks.

use crate::error::RenderError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Opens documents for rasterisation.
pub trait Renderer: Send + Sync {
    /// Open the PDF at `path`. The returned handle closes it when dropped.
    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn RenderedDocument + 'a>, RenderError>;
}

/// An open document.
pub trait RenderedDocument {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Rasterise the page at the 0-based `index`.
    fn render_page(&self, index: usize) -> Result<DynamicImage, RenderError>;
}

/// Size limits applied to every rendered page.
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    /// Multiplier over PDF points (72 per inch).
    pub scale: f32,
    /// Cap on either edge, in pixels.
    pub max_pixels: u32,
}

impl RenderSettings {
    /// `max_pixels` as pdfium takes it, saturating at `i32::MAX`.
    pub fn pixel_cap(&self) -> i32 {
        i32::try_from(self.max_pixels).unwrap_or(i32::MAX)
    }
}

/// [`Renderer`] backed by the pdfium library.
pub struct PdfiumRenderer {
    pdfium: Pdfium,
    settings: RenderSettings,
}

impl PdfiumRenderer {
    /// Bind to libpdfium.
    ///
    /// `lib_path` may name the library file itself or a directory containing
    /// the platform library (`libpdfium.so`, `libpdfium.dylib`, `pdfium.dll`).
    /// Without a path the system library is used.
    pub fn bind(lib_path: Option<&Path>, settings: RenderSettings) -> Result<Self, RenderError> {
        let bindings = match lib_path {
            Some(path) => {
                let file: PathBuf = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(&path.to_path_buf())
                } else {
                    path.to_path_buf()
                };
                info!("Binding pdfium from {}", file.display());
                Pdfium::bind_to_library(&file)
            }
            None => {
                info!("Binding system pdfium library");
                Pdfium::bind_to_system_library()
            }
        }
        .map_err(|e| RenderError::Binding(format!("{e:?}")))?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
            settings,
        })
    }
}

impl Renderer for PdfiumRenderer {
    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn RenderedDocument + 'a>, RenderError> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| RenderError::Open {
                path: path.to_path_buf(),
                detail: format!("{e:?}"),
            })?;

        let max_pixels = self.settings.pixel_cap();
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.settings.scale)
            .set_maximum_width(max_pixels)
            .set_maximum_height(max_pixels);

        debug!(
            "Opened {} ({} pages)",
            path.display(),
            document.pages().len()
        );

        Ok(Box::new(PdfiumDocument {
            document,
            render_config,
        }))
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
    render_config: PdfRenderConfig,
}

impl RenderedDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(&self, index: usize) -> Result<DynamicImage, RenderError> {
        let page_index = u16::try_from(index).map_err(|_| RenderError::Page {
            page: index,
            detail: "page index out of range".into(),
        })?;

        let page = self
            .document
            .pages()
            .get(page_index)
            .map_err(|e| RenderError::Page {
                page: index,
                detail: format!("{e:?}"),
            })?;

        let bitmap = page
            .render_with_config(&self.render_config)
            .map_err(|e| RenderError::Page {
                page: index,
                detail: format!("{e:?}"),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            index,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}
