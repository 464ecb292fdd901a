//! HTTP surface: the conversion endpoint, the upload form, and a health probe.

use crate::config::ServerConfig;
use crate::convert::{Converter, PdfDownload};
use crate::error::ConvertError;
use crate::remote::DocumentService;
use crate::upload;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

/// The browser upload form.
pub const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub converter: Converter,
}

impl AppState {
    pub fn new(service: Arc<dyn DocumentService>, config: ServerConfig) -> Self {
        Self {
            converter: Converter::new(service, Arc::new(config)),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.converter.config().body_limit();

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(|| async { "OK" }))
        .route(
            "/api/convert",
            post(convert).layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Bind, create the scratch directory, and serve until `shutdown` resolves.
pub async fn serve<F>(
    service: Arc<dyn DocumentService>,
    config: ServerConfig,
    shutdown: F,
) -> Result<(), ConvertError>
where
    F: Future<Output = ()> + Send + 'static,
{
    upload::ensure_scratch_dir(&config.upload_dir).await?;
    let addr = config.bind_address()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ConvertError::Internal(format!("failed to bind {addr}: {e}")))?;
    info!(
        "ppt2pdf listening on http://{}, scratch dir {}",
        addr,
        config.upload_dir.display()
    );

    let app = router(AppState::new(service, config));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ConvertError::Internal(format!("server error: {e}")))
}

async fn index() -> impl IntoResponse {
    ([(CACHE_CONTROL, "no-cache")], Html(INDEX_HTML))
}

/// `POST /api/convert`: multipart field `file` in, PDF attachment out.
async fn convert(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ConvertError> {
    let mut multipart = multipart.map_err(|e| ConvertError::MalformedUpload(e.body_text()))?;
    let upload = upload::receive(&mut multipart, state.converter.config()).await?;
    let download = state.converter.convert(upload).await?;
    Ok(pdf_response(download))
}

/// The body goes out chunked. With a `Content-Length` hyper would stop
/// polling once that many bytes were written and never reach the cleanup
/// step chained onto the end of the stream.
fn pdf_response(download: PdfDownload) -> Response {
    let disposition = content_disposition(&download.file_name);
    (
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (CONTENT_DISPOSITION, disposition),
        ],
        download.into_body(),
    )
        .into_response()
}

/// `attachment; filename="…"` with anything a quoted header value cannot
/// carry replaced by `_`.
fn content_disposition(file_name: &str) -> HeaderValue {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"converted.pdf\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_for_plain_names() {
        assert_eq!(
            content_disposition("deck.pdf").to_str().unwrap(),
            "attachment; filename=\"deck.pdf\""
        );
        assert_eq!(
            content_disposition("Q3 review.pdf").to_str().unwrap(),
            "attachment; filename=\"Q3 review.pdf\""
        );
    }

    #[test]
    fn disposition_replaces_unsafe_characters() {
        assert_eq!(
            content_disposition("ré\"sumé\\.pdf").to_str().unwrap(),
            "attachment; filename=\"r__sum__.pdf\""
        );
        assert_eq!(
            content_disposition("a\r\nb.pdf").to_str().unwrap(),
            "attachment; filename=\"a__b.pdf\""
        );
    }

    #[test]
    fn index_page_posts_to_convert_endpoint() {
        assert!(INDEX_HTML.contains("/api/convert"));
        assert!(INDEX_HTML.contains("name=\"file\"") || INDEX_HTML.contains("'file'"));
    }
}
