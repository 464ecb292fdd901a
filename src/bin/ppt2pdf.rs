//! Server binary for ppt2pdf.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServerConfig`, loads OAuth credentials from the environment, and runs
//! the HTTP server until Ctrl+C / SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use ppt2pdf::{server, Credentials, DriveClient, Readiness, RemoteEndpoints, ServerConfig};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port (3000) with ./uploads as scratch space
  ppt2pdf

  # Different port and scratch directory
  ppt2pdf --port 8080 --upload-dir /var/tmp/ppt2pdf

  # Poll Drive for readiness instead of the fixed 2 s wait
  ppt2pdf --ready-poll-interval-ms 500 --ready-poll-attempts 20

  # Convert from the command line against a running server
  curl -F "file=@deck.pptx" -o deck.pdf http://localhost:3000/api/convert

ENVIRONMENT VARIABLES (required, may live in ./.env):
  GOOGLE_CLIENT_ID        OAuth client id
  GOOGLE_CLIENT_SECRET    OAuth client secret
  GOOGLE_REDIRECT_URI     OAuth redirect URI registered for the client
  GOOGLE_REFRESH_TOKEN    Long-lived refresh token with the drive.file scope

  RUST_LOG                Override log filtering (e.g. ppt2pdf=debug)
"#;

/// Serve a web form that converts PowerPoint files to PDF via Google Drive.
#[derive(Parser, Debug)]
#[command(
    name = "ppt2pdf",
    version,
    about = "Serve a web form that converts PowerPoint files to PDF via Google Drive",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "PPT2PDF_HOST", default_value = "0.0.0.0")]
    host: String,

    /// TCP port.
    #[arg(short, long, env = "PPT2PDF_PORT", default_value_t = 3000)]
    port: u16,

    /// Scratch directory for uploads and generated PDFs.
    #[arg(long, env = "PPT2PDF_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Largest accepted upload in MiB.
    #[arg(long, env = "PPT2PDF_MAX_UPLOAD_MB", default_value_t = 50,
          value_parser = clap::value_parser!(u64).range(1..=2048))]
    max_upload_mb: u64,

    /// Fixed wait between remote upload and export, in milliseconds.
    #[arg(long, env = "PPT2PDF_SETTLE_DELAY_MS", default_value_t = 2000)]
    settle_delay_ms: u64,

    /// Poll for readiness at this interval instead of the fixed wait.
    #[arg(long, env = "PPT2PDF_READY_POLL_INTERVAL_MS")]
    ready_poll_interval_ms: Option<u64>,

    /// Readiness checks before giving up (with --ready-poll-interval-ms).
    #[arg(long, env = "PPT2PDF_READY_POLL_ATTEMPTS", default_value_t = 10)]
    ready_poll_attempts: u32,

    /// Per-remote-call timeout in seconds; 0 disables it.
    #[arg(long, env = "PPT2PDF_REMOTE_TIMEOUT_SECS", default_value_t = 120)]
    remote_timeout_secs: u64,

    /// Point every remote endpoint at this base URL (proxies, test doubles).
    #[arg(long, env = "PPT2PDF_REMOTE_BASE_URL")]
    remote_base_url: Option<String>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PPT2PDF_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the variables may come from the real environment.
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Credentials: exit immediately if any are missing ─────────────────
    let credentials = Credentials::from_env().context("OAuth credentials are not configured")?;
    tracing::info!(
        "OAuth client {} configured (redirect {})",
        credentials.client_id,
        credentials.redirect_uri
    );

    let config = build_config(&cli)?;
    tracing::debug!("{:?}", config);

    let drive = DriveClient::new(credentials, config.endpoints.clone())
        .context("Failed to build the Drive client")?;

    server::serve(Arc::new(drive), config, shutdown_signal())
        .await
        .context("Server failed")?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

/// Map CLI args to `ServerConfig`.
fn build_config(cli: &Cli) -> Result<ServerConfig> {
    let readiness = match cli.ready_poll_interval_ms {
        Some(ms) => Readiness::Poll {
            interval: Duration::from_millis(ms),
            max_attempts: cli.ready_poll_attempts,
        },
        None => Readiness::FixedDelay(Duration::from_millis(cli.settle_delay_ms)),
    };
    let remote_timeout =
        (cli.remote_timeout_secs > 0).then(|| Duration::from_secs(cli.remote_timeout_secs));
    let endpoints = cli
        .remote_base_url
        .as_deref()
        .map(RemoteEndpoints::all_at)
        .unwrap_or_default();

    ServerConfig::builder()
        .host(cli.host.clone())
        .port(cli.port)
        .upload_dir(cli.upload_dir.clone())
        .max_upload_bytes(cli.max_upload_mb * 1024 * 1024)
        .readiness(readiness)
        .remote_timeout(remote_timeout)
        .endpoints(endpoints)
        .build()
        .context("Invalid configuration")
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
