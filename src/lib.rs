//! # pdf2images
//!
//! gRPC microservice that rasterises streamed PDF documents into one JPEG per
//! page and uploads the page set to blob storage.
//!
//! ## Pipeline Overview
//!
//! ```text
//! client stream
//!  │
//!  ├─ 1. Ingest   first fragment = metadata, then chunks until end of stream
//!  ├─ 2. Input    check signature, write payload to a scratch file
//!  ├─ 3. Render   rasterise each page via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 4. Encode   JPEG per page, "{stem}(000).jpg", "{stem}(001).jpg", …
//!  ├─ 5. Upload   every page to {container}/{destination}/
//!  └─ 6. Cleanup  scratch file and page directory removed on every path
//! ```
//!
//! Callers see one of two outcomes besides success: the PDF could not be
//! converted (`InvalidArgument`), or it was converted but not uploaded
//! (`Unavailable`). Details stay in the logs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2images::{
//!     rpc, storage, ConversionService, Converter, PdfiumRenderer, RenderSettings,
//!     RpcHandler, ServiceConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::default();
//!     let renderer = PdfiumRenderer::bind(
//!         config.pdfium_lib_path.as_deref(),
//!         RenderSettings {
//!             scale: config.render_scale(),
//!             max_pixels: config.max_rendered_pixels,
//!         },
//!     )?;
//!     let converter = Converter::new(Arc::new(renderer), &config);
//!     let service = ConversionService::new(converter, storage::from_config(&config.storage)?);
//!
//!     let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
//!     let handler = RpcHandler::new(service, &config);
//!     rpc::serve(listener, handler, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2images` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod rpc;
pub mod storage;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder, StorageConfig};
pub use convert::{Converter, ImageSet};
pub use error::{ConfigError, ConvertError, RenderError, ServiceError, StorageError};
pub use pipeline::input::ConversionRequest;
pub use pipeline::render::{PdfiumRenderer, RenderSettings, RenderedDocument, Renderer};
pub use rpc::RpcHandler;
pub use storage::{AzureBlobStorage, AzureCredential, BlobStorage, LocalStorage};
pub use upload::ConversionService;
