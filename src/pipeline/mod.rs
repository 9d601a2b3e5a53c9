//! Stages of the PDF-to-images conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested alone and the rendering backend can be swapped without touching the
//! others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode
//! (bytes → temp file)  (pdfium)  (JPEG files)
//! ```
//!
//! 1. [`input`] : validate the payload and write it to a scoped temp file
//! 2. [`render`]: open the document and rasterise pages one at a time
//! 3. [`encode`]: JPEG-encode each page under an order-preserving name

pub mod encode;
pub mod input;
pub mod render;
