//! Conversion orchestration: upload → remote create → settle → export →
//! local PDF → stream back → cleanup.
//!
//! ## Cleanup model
//!
//! Every artifact a request creates is recorded in a [`ConversionJob`] as
//! soon as it exists. On failure the job is cleaned up before the error is
//! returned. On success the job travels inside the [`PdfDownload`] and runs
//! after the last byte of the response body has been produced; if the
//! client disconnects first, dropping the body drops the job, and its `Drop`
//! schedules the same cleanup on the runtime.
//!
//! Each deletion is attempted independently. Failures are logged and never
//! change the response.

use crate::config::{Readiness, ServerConfig};
use crate::error::{ConvertError, RemoteError};
use crate::remote::{DocumentService, NewDocument};
use crate::upload::{source_mime_type, UploadedFile};
use axum::body::Body;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Download name for a converted upload.
///
/// A trailing `.ppt` / `.pptx` (any case) is replaced by `.pdf`; any other
/// name simply gains `.pdf`.
///
/// ```rust
/// use ppt2pdf::convert::pdf_file_name;
///
/// assert_eq!(pdf_file_name("deck.pptx"), "deck.pdf");
/// assert_eq!(pdf_file_name("Slides.PPT"), "Slides.pdf");
/// ```
pub fn pdf_file_name(original_name: &str) -> String {
    let lower = original_name.to_ascii_lowercase();
    let stem = [".pptx", ".ppt"]
        .iter()
        .find(|ext| lower.ends_with(*ext) && lower.len() > ext.len())
        .map(|ext| &original_name[..original_name.len() - ext.len()])
        .unwrap_or(original_name);
    format!("{stem}.pdf")
}

/// Local path for the exported PDF: the scratch upload path plus `.pdf`.
///
/// Appending keeps it distinct from the upload even when the upload itself
/// is named `*.pdf`.
fn output_path(upload: &Path) -> PathBuf {
    let mut name = upload.as_os_str().to_owned();
    name.push(".pdf");
    PathBuf::from(name)
}

/// Artifacts created while serving one request.
///
/// Every field that is still `Some` when the request finishes gets deleted.
pub struct ConversionJob {
    service: Arc<dyn DocumentService>,
    local_upload: Option<PathBuf>,
    remote_id: Option<String>,
    local_output: Option<PathBuf>,
}

impl ConversionJob {
    /// Start a job that owns `local_upload`.
    pub fn new(service: Arc<dyn DocumentService>, local_upload: PathBuf) -> Self {
        Self {
            service,
            local_upload: Some(local_upload),
            remote_id: None,
            local_output: None,
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn local_output(&self) -> Option<&Path> {
        self.local_output.as_deref()
    }

    /// True once every artifact has been handed to cleanup.
    pub fn is_clean(&self) -> bool {
        self.local_upload.is_none() && self.remote_id.is_none() && self.local_output.is_none()
    }

    /// Delete every recorded artifact. Safe to call more than once.
    pub async fn cleanup(&mut self) {
        let remote_id = self.remote_id.take();
        let upload = self.local_upload.take();
        let output = self.local_output.take();
        cleanup_artifacts(self.service.clone(), remote_id, upload, output).await;
    }
}

impl Drop for ConversionJob {
    fn drop(&mut self) {
        if self.is_clean() {
            return;
        }
        let remote_id = self.remote_id.take();
        let upload = self.local_upload.take();
        let output = self.local_output.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Conversion job dropped before cleanup, scheduling it");
                handle.spawn(cleanup_artifacts(self.service.clone(), remote_id, upload, output));
            }
            Err(_) => {
                for path in upload.iter().chain(output.iter()) {
                    if let Err(e) = std::fs::remove_file(path) {
                        warn!("Failed to delete {}: {}", path.display(), e);
                    }
                }
                if let Some(id) = remote_id {
                    warn!("No runtime available, remote document {} left behind", id);
                }
            }
        }
    }
}

async fn cleanup_artifacts(
    service: Arc<dyn DocumentService>,
    remote_id: Option<String>,
    upload: Option<PathBuf>,
    output: Option<PathBuf>,
) {
    if let Some(id) = remote_id {
        match service.delete(&id).await {
            Ok(()) => debug!("Cleaned up remote document {}", id),
            Err(e) => warn!("Failed to delete remote document {}: {}", id, e),
        }
    }
    for path in upload.iter().chain(output.iter()) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Cleaned up {}", path.display()),
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
}

/// A converted PDF ready to be streamed to the client.
pub struct PdfDownload {
    /// Name the client should save the file under.
    pub file_name: String,
    /// Size of the PDF in bytes.
    pub size: u64,
    file: tokio::fs::File,
    job: ConversionJob,
}

impl PdfDownload {
    pub fn job(&self) -> &ConversionJob {
        &self.job
    }

    /// Turn the download into a response body that cleans up after itself.
    ///
    /// The cleanup runs as the final step of the body stream, so by the time
    /// the client sees end-of-body all artifacts are gone. This holds only
    /// while the response carries no `Content-Length`; a sized body is
    /// dropped by hyper after its last byte, leaving cleanup to `Drop`.
    pub fn into_body(self) -> Body {
        let PdfDownload { file, mut job, .. } = self;
        let finish = stream::once(async move {
            job.cleanup().await;
        })
        .filter_map(|()| async { None::<std::io::Result<Bytes>> });

        Body::from_stream(ReaderStream::new(file).chain(finish))
    }
}

/// Runs the conversion sequence against a shared [`DocumentService`].
#[derive(Clone)]
pub struct Converter {
    service: Arc<dyn DocumentService>,
    config: Arc<ServerConfig>,
}

impl Converter {
    pub fn new(service: Arc<dyn DocumentService>, config: Arc<ServerConfig>) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Convert a received upload to a PDF.
    ///
    /// # Errors
    /// - [`ConvertError::UploadFailed`]: remote create failed
    /// - [`ConvertError::NotReady`]: readiness polling gave up
    /// - [`ConvertError::ReadinessCheck`]: a readiness check failed
    /// - [`ConvertError::ExportFailed`]: PDF export failed
    /// - [`ConvertError::Scratch`]: writing or reopening the local PDF failed
    ///
    /// Whatever artifacts exist at the point of failure are deleted before
    /// the error is returned.
    pub async fn convert(&self, upload: UploadedFile) -> Result<PdfDownload, ConvertError> {
        let start = Instant::now();
        info!("Starting conversion of '{}'", upload.original_name);

        let mut job = ConversionJob::new(self.service.clone(), upload.path.clone());
        match self.run(&mut job, &upload).await {
            Ok((file, size)) => {
                info!(
                    "Converted '{}' in {}ms ({} bytes)",
                    upload.original_name,
                    start.elapsed().as_millis(),
                    size
                );
                Ok(PdfDownload {
                    file_name: pdf_file_name(&upload.original_name),
                    size,
                    file,
                    job,
                })
            }
            Err(e) => {
                job.cleanup().await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        job: &mut ConversionJob,
        upload: &UploadedFile,
    ) -> Result<(tokio::fs::File, u64), ConvertError> {
        // ── Step 1: Create the remote document ───────────────────────────────
        let source_mime = source_mime_type(&upload.original_name, &upload.mime_type);
        let doc = NewDocument {
            name: &upload.original_name,
            source_mime: &source_mime,
            source_path: &upload.path,
        };
        let created = self
            .bounded(self.service.create(doc))
            .await
            .map_err(ConvertError::UploadFailed)?;
        job.remote_id = Some(created.id.clone());

        // ── Step 2: Let the remote ingest settle ─────────────────────────────
        self.await_ready(&created.id).await?;

        // ── Step 3: Export as PDF ────────────────────────────────────────────
        let pdf = self
            .bounded(self.service.export_pdf(&created.id))
            .await
            .map_err(ConvertError::ExportFailed)?;

        // ── Step 4: Persist the PDF next to the upload ───────────────────────
        let output = output_path(&upload.path);
        job.local_output = Some(output.clone());
        let scratch_err = |source| ConvertError::Scratch {
            path: output.clone(),
            source,
        };
        tokio::fs::write(&output, &pdf).await.map_err(scratch_err)?;

        // ── Step 5: Reopen for streaming ─────────────────────────────────────
        let file = tokio::fs::File::open(&output).await.map_err(scratch_err)?;
        Ok((file, pdf.len() as u64))
    }

    async fn await_ready(&self, id: &str) -> Result<(), ConvertError> {
        match self.config.readiness {
            Readiness::FixedDelay(delay) => {
                debug!("Waiting {}ms for remote document {}", delay.as_millis(), id);
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Readiness::Poll {
                interval,
                max_attempts,
            } => {
                for attempt in 1..=max_attempts {
                    tokio::time::sleep(interval).await;
                    let ready = self
                        .bounded(self.service.is_ready(id))
                        .await
                        .map_err(|source| ConvertError::ReadinessCheck {
                            id: id.to_string(),
                            source,
                        })?;
                    if ready {
                        debug!("Remote document {} ready after {} checks", id, attempt);
                        return Ok(());
                    }
                }
                Err(ConvertError::NotReady {
                    id: id.to_string(),
                    attempts: max_attempts,
                })
            }
        }
    }

    /// Apply the configured per-call timeout to a remote call.
    async fn bounded<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match self.config.remote_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RemoteError::Timeout {
                    secs: limit.as_secs().max(1),
                })?,
            None => call.await,
        }
    }
}
