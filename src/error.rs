//! Error types for the ppt2pdf service.
//!
//! Two error types reflect two layers of failure:
//!
//! * [`ConvertError`]: **Request-level**: the conversion request cannot be
//!   completed (bad upload, a remote step failed, scratch I/O broke). It maps
//!   straight onto an HTTP response through its [`IntoResponse`] impl.
//!
//! * [`RemoteError`]: **Call-level**: one call against the remote document
//!   service failed. The orchestrator wraps it in the [`ConvertError`]
//!   variant naming the step that failed, so the client sees which of
//!   upload / readiness / export went wrong.
//!
//! Cleanup failures never become errors; they are logged and dropped.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Generic `error` text carried by every 500 response body.
pub const PROCESSING_FAILED: &str = "Conversion failed";

/// All request-level and startup errors returned by the ppt2pdf library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Client input errors (400) ─────────────────────────────────────────
    /// The multipart body carried no `file` field with a file name.
    #[error("No file uploaded")]
    MissingFile,

    /// Neither the MIME type nor the extension is on the PowerPoint allow-list.
    #[error("Only PowerPoint files (.ppt, .pptx) are allowed")]
    UnsupportedFileType { file_name: String, mime_type: String },

    /// The upload exceeded the server-side ceiling.
    #[error("File too large: maximum upload size is {} MB", .limit_bytes / (1024 * 1024))]
    FileTooLarge { limit_bytes: u64 },

    /// The request body was not a readable multipart form.
    #[error("Invalid upload: {0}")]
    MalformedUpload(String),

    // ── Remote step errors (500) ──────────────────────────────────────────
    /// Creating the remote document failed.
    #[error("Failed to upload file to Google Drive: {0}")]
    UploadFailed(#[source] RemoteError),

    /// The remote document never reported ready while polling.
    #[error("Remote document {id} not ready after {attempts} checks")]
    NotReady { id: String, attempts: u32 },

    /// A readiness check itself failed.
    #[error("Failed to check remote document {id}: {source}")]
    ReadinessCheck {
        id: String,
        #[source]
        source: RemoteError,
    },

    /// Exporting the remote document as PDF failed.
    #[error("Failed to convert to PDF: {0}")]
    ExportFailed(#[source] RemoteError),

    // ── Local I/O errors (500) ────────────────────────────────────────────
    /// Reading or writing a scratch file failed.
    #[error("Scratch storage error at '{path}': {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Startup errors ────────────────────────────────────────────────────
    /// A required credential variable is unset or empty.
    #[error("Missing required environment variable {var}")]
    MissingCredential { var: &'static str },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ConvertError::MissingFile
            | ConvertError::UnsupportedFileType { .. }
            | ConvertError::FileTooLarge { .. }
            | ConvertError::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors caused by the uploaded request rather than the service.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// The JSON body sent back for this error.
    pub fn body(&self) -> ErrorBody {
        if self.is_client_error() {
            ErrorBody {
                error: self.to_string(),
                details: None,
            }
        } else {
            ErrorBody {
                error: PROCESSING_FAILED.to_string(),
                details: Some(self.to_string()),
            }
        }
    }
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        if self.is_client_error() {
            tracing::debug!("Rejected upload: {}", self);
        } else {
            tracing::error!("Conversion error: {:#}", self);
        }
        (self.status_code(), Json(self.body())).into_response()
    }
}

/// JSON error body returned by `POST /api/convert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A failure of a single call against the remote document service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The refresh-token grant did not yield an access token.
    #[error("token refresh failed: {0}")]
    Token(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The local source file could not be read for upload.
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The call did not finish within the configured bound.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Build a [`RemoteError::Status`], truncating long bodies.
    pub fn status(status: u16, body: &str) -> Self {
        const MAX_BODY: usize = 512;
        let body = if body.chars().count() > MAX_BODY {
            let cut: String = body.chars().take(MAX_BODY).collect();
            format!("{cut}\u{2026}")
        } else {
            body.to_string()
        };
        RemoteError::Status { status, body }
    }

    /// True when the service rejected our access token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Status { status: 401, .. })
    }
}
