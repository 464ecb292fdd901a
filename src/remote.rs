//! Remote document service: the trait the orchestrator drives, and the
//! Google Drive v3 implementation used in production.
//!
//! The conversion itself happens entirely on the remote side. Uploading a
//! PowerPoint file with the target type set to Drive's native presentation
//! format makes Drive transcode it on ingest; exporting that document as
//! `application/pdf` yields the PDF. The client therefore only needs four
//! calls: create, (optionally) check readiness, export, delete.
//!
//! ## Why a trait?
//!
//! The orchestrator owns the cleanup guarantees and the step-by-step error
//! mapping; none of that depends on HTTP details. Injecting an
//! `Arc<dyn DocumentService>` lets the same orchestration run against Drive
//! in production and against an in-process fake in tests.

use crate::config::RemoteEndpoints;
use crate::credentials::{Credentials, TokenManager};
use crate::error::RemoteError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Drive's native presentation type; uploading with this target converts.
pub const NATIVE_PRESENTATION_MIME: &str = "application/vnd.google-apps.presentation";

/// Export representation requested from the service.
pub const PDF_MIME: &str = "application/pdf";

/// A local file to be stored remotely as a native presentation.
#[derive(Debug, Clone, Copy)]
pub struct NewDocument<'a> {
    /// Display name on the remote side (the original upload name).
    pub name: &'a str,
    /// MIME type of the local file.
    pub source_mime: &'a str,
    /// Path of the local file whose bytes are uploaded.
    pub source_path: &'a Path,
}

/// A document created on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteDocument {
    /// Opaque remote identifier.
    pub id: String,
    /// Remote type after ingest, when the service reports it.
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// The three remote calls the orchestrator needs, plus a readiness probe.
///
/// Implementations must be `Send + Sync`: one instance is shared by every
/// in-flight request for the lifetime of the process.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Upload `doc` and have the service convert it to its native format.
    async fn create(&self, doc: NewDocument<'_>) -> Result<RemoteDocument, RemoteError>;

    /// Whether the remote ingest of `id` has finished.
    ///
    /// Only consulted with [`crate::config::Readiness::Poll`]. The default
    /// reports ready immediately.
    async fn is_ready(&self, id: &str) -> Result<bool, RemoteError> {
        let _ = id;
        Ok(true)
    }

    /// Export `id` as a PDF held in memory.
    async fn export_pdf(&self, id: &str) -> Result<Bytes, RemoteError>;

    /// Delete `id`.
    async fn delete(&self, id: &str) -> Result<(), RemoteError>;
}

/// Google Drive v3 client authenticated with a refresh token.
pub struct DriveClient {
    http: Client,
    endpoints: RemoteEndpoints,
    tokens: TokenManager,
}

impl DriveClient {
    /// Build a client with its own HTTP connection pool.
    pub fn new(credentials: Credentials, endpoints: RemoteEndpoints) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent(concat!("ppt2pdf/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http_client(http, credentials, endpoints))
    }

    /// Build a client on top of an existing `reqwest::Client`.
    pub fn with_http_client(http: Client, credentials: Credentials, endpoints: RemoteEndpoints) -> Self {
        let tokens = TokenManager::new(http.clone(), endpoints.token_url.clone(), credentials);
        Self {
            http,
            endpoints,
            tokens,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        self.tokens.credentials()
    }

    fn files_url(&self, id: &str) -> String {
        format!(
            "{}/drive/v3/files/{}",
            self.endpoints.api_base_url.trim_end_matches('/'),
            id
        )
    }

    /// Attach a bearer token, send, and turn non-success statuses into errors.
    ///
    /// A 401 drops the cached token so the next request re-authenticates;
    /// the failing call itself is not retried.
    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = RemoteError::status(status.as_u16(), body.trim());
        if err.is_unauthorized() {
            self.tokens.invalidate().await;
        }
        Err(err)
    }
}

#[async_trait]
impl DocumentService for DriveClient {
    async fn create(&self, doc: NewDocument<'_>) -> Result<RemoteDocument, RemoteError> {
        let io_err = |source| RemoteError::Io {
            path: doc.source_path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(doc.source_path).await.map_err(io_err)?;
        let file_len = file.metadata().await.map_err(io_err)?.len();

        let metadata = serde_json::json!({
            "name": doc.name,
            "mimeType": NATIVE_PRESENTATION_MIME,
        });
        let boundary = format!("ppt2pdf-{}", uuid::Uuid::new_v4().simple());
        let head = format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{boundary}\r\nContent-Type: {}\r\n\r\n",
            doc.source_mime
        );
        let tail = format!("\r\n--{boundary}--\r\n");
        let content_length = head.len() as u64 + file_len + tail.len() as u64;

        // multipart/related: JSON metadata part, then the file streamed from disk.
        let body = stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(head)) })
            .chain(ReaderStream::new(file))
            .chain(stream::once(async move { Ok(Bytes::from(tail)) }));

        let url = format!(
            "{}/upload/drive/v3/files",
            self.endpoints.upload_base_url.trim_end_matches('/')
        );
        let request = self
            .http
            .post(url)
            .query(&[("uploadType", "multipart"), ("fields", "id,mimeType")])
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .header(CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(body));

        let created: RemoteDocument = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        info!(
            "Created remote document {} from '{}' ({} bytes)",
            created.id, doc.name, file_len
        );
        Ok(created)
    }

    async fn is_ready(&self, id: &str) -> Result<bool, RemoteError> {
        let request = self
            .http
            .get(self.files_url(id))
            .query(&[("fields", "id,mimeType")]);

        match self.send(request).await {
            Ok(response) => {
                let doc: RemoteDocument = response
                    .json()
                    .await
                    .map_err(|e| RemoteError::Decode(e.to_string()))?;
                let ready = doc.mime_type.as_deref() == Some(NATIVE_PRESENTATION_MIME);
                debug!("Remote document {} ready: {}", id, ready);
                Ok(ready)
            }
            Err(RemoteError::Status { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn export_pdf(&self, id: &str) -> Result<Bytes, RemoteError> {
        let request = self
            .http
            .get(format!("{}/export", self.files_url(id)))
            .query(&[("mimeType", PDF_MIME)]);

        let pdf = self.send(request).await?.bytes().await?;
        debug!("Exported remote document {} as PDF ({} bytes)", id, pdf.len());
        Ok(pdf)
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.send(self.http.delete(self.files_url(id))).await?;
        debug!("Deleted remote document {}", id);
        Ok(())
    }
}
