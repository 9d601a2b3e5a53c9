//! Service configuration.
//!
//! Every knob lives in [`ServiceConfig`], built via [`ServiceConfigBuilder`]
//! or deserialised from a JSON document. The binary layers sources in this
//! order: defaults, then an optional JSON file, then CLI flags and
//! environment variables.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest accepted [`ServiceConfig::max_rendered_pixels`].
pub const MIN_RENDERED_PIXELS: u32 = 100;

/// Largest accepted [`ServiceConfig::max_rendered_pixels`]; keeps one page
/// bitmap within a few gigabytes.
pub const MAX_RENDERED_PIXELS: u32 = 20_000;

/// Runtime configuration for the conversion service.
///
/// # Example
/// ```rust
/// use pdf2images::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .jpeg_quality(85)
///     .dpi(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.jpeg_quality, 85);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the gRPC server binds to. Default: `0.0.0.0:50051`.
    pub listen_addr: SocketAddr,

    /// JPEG quality, 1–100. Default: 75.
    pub jpeg_quality: u8,

    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on either edge of a rendered page, in pixels. Default: 2000.
    ///
    /// Applied after DPI scaling so an A0 poster cannot allocate a
    /// multi-gigabyte bitmap.
    pub max_rendered_pixels: u32,

    /// Root for per-call temp files and directories.
    /// `None` uses the OS temp directory.
    pub scratch_dir: Option<PathBuf>,

    /// Largest accepted PDF payload in bytes. Default: 256 MiB.
    pub max_payload_bytes: usize,

    /// Server-side deadline for one call, in seconds. Default: 300.
    ///
    /// A shorter `grpc-timeout` sent by the client wins.
    pub request_timeout_secs: u64,

    /// Directory containing libpdfium, or the library file itself.
    /// `None` binds to the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Where converted pages are uploaded.
    pub storage: StorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 50051)),
            jpeg_quality: 75,
            dpi: 150,
            max_rendered_pixels: 2000,
            scratch_dir: None,
            max_payload_bytes: 256 * 1024 * 1024,
            request_timeout_secs: 300,
            pdfium_lib_path: None,
            storage: StorageConfig::default(),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("listen_addr", &self.listen_addr)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("scratch_dir", &self.scratch_dir)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("storage", &self.storage)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder seeded with the defaults.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Create a builder seeded with an existing config, for layering overrides.
    pub fn into_builder(self) -> ServiceConfigBuilder {
        ServiceConfigBuilder { config: self }
    }

    /// Read a JSON config document. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("cannot read '{}': {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError(format!("cannot parse '{}': {e}", path.display())))
    }

    /// Scratch root, falling back to the OS temp directory.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Render scale relative to PDF points (72 per inch).
    pub fn render_scale(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.listen_addr = addr;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.clamp(MIN_RENDERED_PIXELS, MAX_RENDERED_PIXELS);
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn max_payload_bytes(mut self, n: usize) -> Self {
        self.config.max_payload_bytes = n;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Values deserialised from a file bypass the clamping setters, so the
    /// ranges are checked again here.
    pub fn build(self) -> Result<ServiceConfig, ConfigError> {
        let c = &self.config;
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return Err(ConfigError(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ConfigError(format!("DPI must be 72–400, got {}", c.dpi)));
        }
        if !(MIN_RENDERED_PIXELS..=MAX_RENDERED_PIXELS).contains(&c.max_rendered_pixels) {
            return Err(ConfigError(format!(
                "max rendered pixels must be {MIN_RENDERED_PIXELS}–{MAX_RENDERED_PIXELS}, got {}",
                c.max_rendered_pixels
            )));
        }
        if c.max_payload_bytes == 0 {
            return Err(ConfigError("max payload size must be ≥ 1 byte".into()));
        }
        if c.request_timeout_secs == 0 {
            return Err(ConfigError("request timeout must be ≥ 1s".into()));
        }
        c.storage.validate()?;
        Ok(self.config)
    }
}

// ── Storage ──────────────────────────────────────────────────────────────

/// Blob storage backend selection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Copy pages into a local directory tree: `{root}/{container}/{path}`.
    Local { root: PathBuf },

    /// Azure Blob Storage, authorised with either a SAS token or the
    /// account key (Shared Key signing). Exactly one must be set.
    Azure {
        #[serde(default)]
        account: String,
        #[serde(default)]
        sas_token: String,
        /// Base64 account access key.
        #[serde(default)]
        account_key: String,
        /// Overrides `https://{account}.blob.core.windows.net`
        /// (e.g. an Azurite emulator URL).
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default = "default_blob_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_upload_concurrency")]
        upload_concurrency: usize,
    },
}

fn default_blob_timeout_secs() -> u64 {
    60
}

fn default_upload_concurrency() -> usize {
    4
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            root: PathBuf::from("blobs"),
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageConfig::Local { root } => f.debug_struct("Local").field("root", root).finish(),
            StorageConfig::Azure {
                account,
                endpoint,
                timeout_secs,
                upload_concurrency,
                ..
            } => f
                .debug_struct("Azure")
                .field("account", account)
                .field("sas_token", &"<redacted>")
                .field("account_key", &"<redacted>")
                .field("endpoint", endpoint)
                .field("timeout_secs", timeout_secs)
                .field("upload_concurrency", upload_concurrency)
                .finish(),
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StorageConfig::Local { root } if root.as_os_str().is_empty() => {
                Err(ConfigError("local storage root must not be empty".into()))
            }
            StorageConfig::Azure {
                account, endpoint, ..
            } if account.is_empty() && endpoint.is_none() => Err(ConfigError(
                "azure storage needs an account name or an endpoint".into(),
            )),
            StorageConfig::Azure {
                sas_token,
                account_key,
                ..
            } if sas_token.is_empty() == account_key.is_empty() => Err(ConfigError(
                "azure storage needs exactly one of a SAS token or an account key".into(),
            )),
            StorageConfig::Azure {
                account,
                account_key,
                ..
            } if !account_key.is_empty() && account.is_empty() => Err(ConfigError(
                "azure shared key authorisation needs the account name".into(),
            )),
            StorageConfig::Azure {
                upload_concurrency: 0,
                ..
            } => Err(ConfigError("upload concurrency must be ≥ 1".into())),
            _ => Ok(()),
        }
    }
}
