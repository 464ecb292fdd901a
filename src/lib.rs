//! # ppt2pdf
//!
//! Convert PowerPoint uploads to PDF by delegating the conversion to Google
//! Drive.
//!
//! ## How it works
//!
//! Drive converts an uploaded `.ppt`/`.pptx` into its native presentation
//! format on ingest, and can export any native presentation as PDF. This
//! crate is the orchestration around those two facts: accept an upload,
//! push it to Drive, pull the PDF back, and make sure nothing is left
//! behind locally or remotely.
//!
//! ```text
//! browser form
//!  │  POST /api/convert (multipart "file")
//!  ├─ 1. Receive  validate type + size, stream to scratch storage
//!  ├─ 2. Create   upload to Drive as a native presentation
//!  ├─ 3. Settle   fixed 2 s wait (or readiness polling)
//!  ├─ 4. Export   download the PDF representation
//!  ├─ 5. Respond  stream the PDF back as an attachment
//!  └─ 6. Cleanup  delete remote doc, upload, output, always
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ppt2pdf::{server, Credentials, DriveClient, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let drive = DriveClient::new(Credentials::from_env()?, config.endpoints.clone())?;
//!     server::serve(Arc::new(drive), config, std::future::pending()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ppt2pdf` binary (clap + anyhow + tracing-subscriber + dotenv) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod credentials;
pub mod error;
pub mod remote;
pub mod server;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Readiness, RemoteEndpoints, ServerConfig, ServerConfigBuilder};
pub use convert::{pdf_file_name, ConversionJob, Converter, PdfDownload};
pub use credentials::{Credentials, TokenManager};
pub use error::{ConvertError, ErrorBody, RemoteError};
pub use remote::{DocumentService, DriveClient, NewDocument, RemoteDocument};
pub use server::{router, AppState};
pub use upload::{is_powerpoint, UploadedFile};
