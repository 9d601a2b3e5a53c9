//! CLI binary for pdf2images.
//!
//! A thin shim over the library crate: layers the configuration sources into
//! a `ServiceConfig`, installs logging, binds pdfium and serves gRPC until
//! Ctrl-C or SIGTERM.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pdf2images::{
    rpc, storage, ConversionService, Converter, PdfiumRenderer, RenderSettings, RpcHandler,
    ServiceConfig, StorageConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const AFTER_HELP: &str = r#"EXAMPLES:
  # Local run, pages copied under ./blobs
  pdf2images start local

  # Azure, settings from a JSON document plus a secret from the environment
  PDF2IMAGES_AZURE_SAS_TOKEN='sv=...&sig=...' \
    pdf2images start prd --config /etc/pdf2images.json --storage azure --azure-account acct

CONFIG FILE (JSON, every field optional):
  {
    "listen_addr": "0.0.0.0:50051",
    "jpeg_quality": 75,
    "dpi": 150,
    "scratch_dir": "/var/tmp/pdf2images",
    "storage": { "backend": "azure", "account": "acct", "sas_token": "..." }
  }
  Use "account_key" instead of "sas_token" to sign requests with the account key.

ENVIRONMENT VARIABLES:
  RUST_LOG                 Log filter, overrides --verbose
  PDF2IMAGES_*             Every flag below, e.g. PDF2IMAGES_DPI=200
"#;

/// Rasterise streamed PDFs into JPEG pages and upload them to blob storage.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2images",
    version,
    about = "gRPC service converting PDF documents into per-page JPEG images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the gRPC server.
    Start(StartArgs),
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Deployment environment; selects the default log format.
    #[arg(value_enum, env = "PDF2IMAGES_ENV")]
    environment: Environment,

    /// JSON config document, applied before flags.
    #[arg(long, env = "PDF2IMAGES_CONFIG")]
    config: Option<PathBuf>,

    /// gRPC bind address.
    #[arg(long, env = "PDF2IMAGES_LISTEN_ADDR")]
    listen_addr: Option<SocketAddr>,

    /// JPEG quality (1–100).
    #[arg(long, env = "PDF2IMAGES_JPEG_QUALITY",
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: Option<u8>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2IMAGES_DPI",
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: Option<u32>,

    /// Cap on either edge of a rendered page, in pixels.
    #[arg(long, env = "PDF2IMAGES_MAX_RENDERED_PIXELS")]
    max_rendered_pixels: Option<u32>,

    /// Root for per-call scratch files. Default: OS temp directory.
    #[arg(long, env = "PDF2IMAGES_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Largest accepted PDF, in bytes.
    #[arg(long, env = "PDF2IMAGES_MAX_PAYLOAD_BYTES")]
    max_payload_bytes: Option<usize>,

    /// Server-side deadline per call, in seconds.
    #[arg(long, env = "PDF2IMAGES_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Directory containing libpdfium, or the library file.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Storage backend; replaces the one from --config.
    #[arg(long, value_enum, env = "PDF2IMAGES_STORAGE")]
    storage: Option<StorageArg>,

    /// Root directory for the local backend.
    #[arg(long, env = "PDF2IMAGES_LOCAL_ROOT", default_value = "blobs")]
    local_root: PathBuf,

    /// Azure storage account name.
    #[arg(long, env = "PDF2IMAGES_AZURE_ACCOUNT")]
    azure_account: Option<String>,

    /// Azure SAS token (query string, with or without the leading '?').
    #[arg(long, env = "PDF2IMAGES_AZURE_SAS_TOKEN", hide_env_values = true)]
    azure_sas_token: Option<String>,

    /// Azure account access key (base64); requests are signed with Shared Key.
    #[arg(long, env = "PDF2IMAGES_AZURE_ACCOUNT_KEY", hide_env_values = true,
          conflicts_with = "azure_sas_token")]
    azure_account_key: Option<String>,

    /// Blob endpoint override, e.g. an Azurite URL.
    #[arg(long, env = "PDF2IMAGES_AZURE_ENDPOINT")]
    azure_endpoint: Option<String>,

    /// Log format. Default: pretty for `local`, json otherwise.
    #[arg(long, value_enum, env = "PDF2IMAGES_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2IMAGES_VERBOSE")]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Environment {
    Local,
    Dev,
    Stg,
    Prd,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StorageArg {
    Local,
    Azure,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Start(args) => start(args).await,
    }
}

async fn start(args: StartArgs) -> Result<()> {
    init_logging(&args)?;
    let config = load_config(&args)?;
    info!(environment = ?args.environment, config = ?config, "starting pdf2images");

    if let Some(dir) = &config.scratch_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create scratch directory {}", dir.display()))?;
    }

    let renderer = PdfiumRenderer::bind(
        config.pdfium_lib_path.as_deref(),
        RenderSettings {
            scale: config.render_scale(),
            max_pixels: config.max_rendered_pixels,
        },
    )
    .context("Failed to bind the PDFium library")?;
    let storage =
        storage::from_config(&config.storage).context("Failed to build the storage backend")?;

    let converter = Converter::new(Arc::new(renderer), &config);
    let service = ConversionService::new(converter, storage);
    let handler = RpcHandler::new(service, &config);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    rpc::serve(listener, handler, shutdown_signal())
        .await
        .context("gRPC server failed")?;

    info!("server stopped");
    Ok(())
}

fn init_logging(args: &StartArgs) -> Result<()> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let format = args.log_format.unwrap_or(match args.environment {
        Environment::Local => LogFormat::Pretty,
        _ => LogFormat::Json,
    });
    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}

/// Defaults, then `--config`, then flags and environment variables.
fn load_config(args: &StartArgs) -> Result<ServiceConfig> {
    let base = match &args.config {
        Some(path) => ServiceConfig::from_json_file(path)?,
        None => ServiceConfig::default(),
    };

    let mut builder = base.clone().into_builder();
    if let Some(addr) = args.listen_addr {
        builder = builder.listen_addr(addr);
    }
    if let Some(q) = args.jpeg_quality {
        builder = builder.jpeg_quality(q);
    }
    if let Some(dpi) = args.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(px) = args.max_rendered_pixels {
        builder = builder.max_rendered_pixels(px);
    }
    if let Some(dir) = &args.scratch_dir {
        builder = builder.scratch_dir(dir);
    }
    if let Some(n) = args.max_payload_bytes {
        builder = builder.max_payload_bytes(n);
    }
    if let Some(secs) = args.request_timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(path) = &args.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }
    if let Some(storage) = storage_override(args, &base.storage)? {
        builder = builder.storage(storage);
    }

    Ok(builder.build()?)
}

fn storage_override(args: &StartArgs, current: &StorageConfig) -> Result<Option<StorageConfig>> {
    let azure_flags = args.azure_account.is_some()
        || args.azure_sas_token.is_some()
        || args.azure_account_key.is_some()
        || args.azure_endpoint.is_some();

    match args.storage {
        Some(StorageArg::Local) => Ok(Some(StorageConfig::Local {
            root: args.local_root.clone(),
        })),
        Some(StorageArg::Azure) => {
            if args.azure_sas_token.is_none() && args.azure_account_key.is_none() {
                bail!("--storage azure needs --azure-sas-token or --azure-account-key");
            }
            Ok(Some(StorageConfig::Azure {
                account: args.azure_account.clone().unwrap_or_default(),
                sas_token: args.azure_sas_token.clone().unwrap_or_default(),
                account_key: args.azure_account_key.clone().unwrap_or_default(),
                endpoint: args.azure_endpoint.clone(),
                timeout_secs: 60,
                upload_concurrency: 4,
            }))
        }
        // No explicit backend: patch the Azure settings from the file.
        None => match current {
            StorageConfig::Azure {
                account,
                sas_token,
                account_key,
                endpoint,
                timeout_secs,
                upload_concurrency,
            } if azure_flags => {
                // A credential given on the command line replaces the file's one.
                let (sas_token, account_key) =
                    match (&args.azure_sas_token, &args.azure_account_key) {
                        (Some(sas), _) => (sas.clone(), String::new()),
                        (None, Some(key)) => (String::new(), key.clone()),
                        (None, None) => (sas_token.clone(), account_key.clone()),
                    };
                Ok(Some(StorageConfig::Azure {
                    account: args.azure_account.clone().unwrap_or_else(|| account.clone()),
                    sas_token,
                    account_key,
                    endpoint: args.azure_endpoint.clone().or_else(|| endpoint.clone()),
                    timeout_secs: *timeout_secs,
                    upload_concurrency: *upload_concurrency,
                }))
            }
            StorageConfig::Local { .. } if azure_flags => {
                warn!("azure flags ignored: storage backend is local (use --storage azure)");
                Ok(None)
            }
            _ => Ok(None),
        },
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight calls");
}
