//! HTTP-level tests for the conversion endpoint.
//!
//! The router runs under `axum-test`, in memory or over a real socket where
//! wire behaviour matters. The remote document service is replaced by an
//! in-memory double so every request/cleanup interaction can be asserted
//! without a Google account.
//!
//! Run with:
//!   cargo test --test api

use async_trait::async_trait;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use bytes::Bytes;
use ppt2pdf::{
    router, AppState, DocumentService, ErrorBody, NewDocument, Readiness, RemoteDocument,
    RemoteError, ServerConfig,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const FAKE_PDF: &[u8] = b"%PDF-1.4\n1 0 obj <<>> endobj\n%%EOF\n";

// ── Test doubles ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingService {
    fail_export: bool,
    delete_delay: Duration,
    creates: AtomicUsize,
    uploaded_names: Mutex<Vec<String>>,
    source_mimes: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl RecordingService {
    fn failing_export() -> Self {
        Self {
            fail_export: true,
            ..Default::default()
        }
    }

    fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentService for RecordingService {
    async fn create(&self, doc: NewDocument<'_>) -> Result<RemoteDocument, RemoteError> {
        assert!(doc.source_path.exists(), "upload must be on disk during create");
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        self.uploaded_names.lock().unwrap().push(doc.name.to_string());
        self.source_mimes
            .lock()
            .unwrap()
            .push(doc.source_mime.to_string());
        Ok(RemoteDocument {
            id: format!("remote-{n}"),
            mime_type: Some("application/vnd.google-apps.presentation".into()),
        })
    }

    async fn export_pdf(&self, id: &str) -> Result<Bytes, RemoteError> {
        if self.fail_export {
            return Err(RemoteError::status(500, &format!("cannot export {id}")));
        }
        Ok(Bytes::from_static(FAKE_PDF))
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        tokio::time::sleep(self.delete_delay).await;
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Harness {
    server: TestServer,
    service: Arc<RecordingService>,
    scratch: TempDir,
}

fn harness_with(service: RecordingService, max_upload_bytes: u64) -> Harness {
    build_harness(service, max_upload_bytes, false)
}

/// Serve over a real TCP socket instead of the in-memory transport.
fn http_harness(service: RecordingService) -> Harness {
    build_harness(service, 50 * 1024 * 1024, true)
}

fn build_harness(service: RecordingService, max_upload_bytes: u64, http: bool) -> Harness {
    let scratch = tempfile::tempdir().unwrap();
    let config = ServerConfig::builder()
        .upload_dir(scratch.path())
        .max_upload_bytes(max_upload_bytes)
        .readiness(Readiness::FixedDelay(Duration::ZERO))
        .build()
        .unwrap();
    let service = Arc::new(service);
    let app = router(AppState::new(service.clone(), config));
    let server = if http {
        TestServer::builder().http_transport().build(app).unwrap()
    } else {
        TestServer::new(app).unwrap()
    };
    Harness {
        server,
        service,
        scratch,
    }
}

fn harness() -> Harness {
    harness_with(RecordingService::default(), 50 * 1024 * 1024)
}

fn upload_form(file_name: &str, mime: &str, bytes: &[u8]) -> MultipartForm {
    let part = Part::bytes(bytes.to_vec())
        .file_name(file_name.to_string())
        .mime_type(mime.to_string());
    MultipartForm::new().add_part("file", part)
}

fn scratch_entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

// ── Validation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejects_non_powerpoint_without_remote_calls() {
    let h = harness();
    let response = h
        .server
        .post("/api/convert")
        .multipart(upload_form("notes.txt", "text/plain", b"hello"))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "Only PowerPoint files (.ppt, .pptx) are allowed");
    assert!(body.details.is_none());
    assert_eq!(h.service.creates(), 0);
    assert!(scratch_entries(h.scratch.path()).is_empty());
}

#[tokio::test]
async fn rejects_oversized_upload_without_remote_calls() {
    let h = harness_with(RecordingService::default(), 1024);
    let response = h
        .server
        .post("/api/convert")
        .multipart(upload_form("big.pptx", PPTX_MIME, &vec![0u8; 4096]))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert!(body.error.starts_with("File too large"), "got: {}", body.error);
    assert_eq!(h.service.creates(), 0);
    assert!(scratch_entries(h.scratch.path()).is_empty());
}

#[tokio::test]
async fn rejects_request_without_file_field() {
    let h = harness();
    let response = h
        .server
        .post("/api/convert")
        .multipart(MultipartForm::new().add_text("purpose", "slides"))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "No file uploaded");
    assert_eq!(h.service.creates(), 0);
}

#[tokio::test]
async fn rejects_non_multipart_body() {
    let h = harness();
    let response = h
        .server
        .post("/api/convert")
        .text("not a form")
        .expect_failure()
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert!(body.error.starts_with("Invalid upload"), "got: {}", body.error);
}

#[tokio::test]
async fn extension_alone_is_enough_when_mime_is_generic() {
    let h = harness();
    let response = h
        .server
        .post("/api/convert")
        .multipart(upload_form("deck.ppt", "application/octet-stream", b"legacy"))
        .await;

    response.assert_status_ok();
    assert_eq!(h.service.creates(), 1);
    assert_eq!(
        *h.service.source_mimes.lock().unwrap(),
        vec!["application/vnd.ms-powerpoint".to_string()]
    );
}

#[tokio::test]
async fn allow_listed_client_mime_is_forwarded_unchanged() {
    let h = harness();
    h.server
        .post("/api/convert")
        .multipart(upload_form("deck.bin", PPTX_MIME, b"PK\x03\x04"))
        .await
        .assert_status_ok();

    assert_eq!(
        *h.service.source_mimes.lock().unwrap(),
        vec![PPTX_MIME.to_string()]
    );
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn converts_and_cleans_up_every_artifact() {
    let h = harness();
    let response = h
        .server
        .post("/api/convert")
        .multipart(upload_form("deck.pptx", PPTX_MIME, b"PK\x03\x04 slides"))
        .await;

    response.assert_status_ok();
    assert_eq!(response.header(CONTENT_TYPE), "application/pdf");
    assert_eq!(
        response.header(CONTENT_DISPOSITION),
        "attachment; filename=\"deck.pdf\""
    );
    assert_eq!(response.as_bytes().as_ref(), FAKE_PDF);

    assert_eq!(h.service.creates(), 1);
    assert_eq!(
        *h.service.uploaded_names.lock().unwrap(),
        vec!["deck.pptx".to_string()]
    );
    assert_eq!(h.service.deleted(), vec!["remote-1".to_string()]);
    assert!(
        scratch_entries(h.scratch.path()).is_empty(),
        "scratch dir should be empty after the body is consumed"
    );
}

#[tokio::test]
async fn cleanup_finishes_before_the_http_response_completes() {
    let h = http_harness(RecordingService {
        delete_delay: Duration::from_millis(200),
        ..Default::default()
    });
    let response = h
        .server
        .post("/api/convert")
        .multipart(upload_form("deck.pptx", PPTX_MIME, b"PK\x03\x04 slides"))
        .await;

    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), FAKE_PDF);
    assert!(response.maybe_header("content-length").is_none());

    // Checked immediately: no grace period for a background task.
    assert_eq!(h.service.deleted(), vec!["remote-1".to_string()]);
    assert!(
        scratch_entries(h.scratch.path()).is_empty(),
        "scratch dir not empty at end of response: {:?}",
        scratch_entries(h.scratch.path())
    );
}

#[tokio::test]
async fn download_name_replaces_extension_case_insensitively() {
    let h = harness();
    let response = h
        .server
        .post("/api/convert")
        .multipart(upload_form(
            "Slides.PPT",
            "application/vnd.ms-powerpoint",
            b"legacy",
        ))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.header(CONTENT_DISPOSITION),
        "attachment; filename=\"Slides.pdf\""
    );
}

#[tokio::test]
async fn export_failure_returns_500_and_still_deletes_remote_document() {
    let h = harness_with(RecordingService::failing_export(), 50 * 1024 * 1024);
    let response = h
        .server
        .post("/api/convert")
        .multipart(upload_form("deck.pptx", PPTX_MIME, b"PK\x03\x04"))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "Conversion failed");
    let details = body.details.expect("details present on processing errors");
    assert!(details.contains("Failed to convert to PDF"), "got: {details}");

    assert_eq!(h.service.deleted(), vec!["remote-1".to_string()]);
    assert!(scratch_entries(h.scratch.path()).is_empty());
}

#[tokio::test]
async fn concurrent_uploads_with_the_same_name_do_not_collide() {
    let h = harness();
    let send = |payload: &'static [u8]| {
        let request = h
            .server
            .post("/api/convert")
            .multipart(upload_form("deck.pptx", PPTX_MIME, payload));
        async move { request.await }
    };

    let (a, b) = tokio::join!(send(b"first"), send(b"second"));
    a.assert_status_ok();
    b.assert_status_ok();

    assert_eq!(h.service.creates(), 2);
    let mut deleted = h.service.deleted();
    deleted.sort();
    assert_eq!(deleted, vec!["remote-1".to_string(), "remote-2".to_string()]);
    assert!(scratch_entries(h.scratch.path()).is_empty());
}

// ── Static routes ────────────────────────────────────────────────────────────

#[tokio::test]
async fn serves_upload_form_and_health_probe() {
    let h = harness();

    let index = h.server.get("/").await;
    index.assert_status_ok();
    assert!(index.text().contains("/api/convert"));

    let health = h.server.get("/healthz").await;
    health.assert_status_ok();
    health.assert_text("OK");
}
