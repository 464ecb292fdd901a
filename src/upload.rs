//! Upload receiver: validate one multipart PowerPoint file and land it in
//! scratch storage.
//!
//! Validation happens in two phases. The type check runs on the field
//! headers before a single byte is written, and the size check runs while
//! chunks stream to disk, so an oversized upload is cut off at the ceiling
//! instead of being buffered whole. Either way nothing reaches the remote
//! service unless the file passes both.

use crate::config::ServerConfig;
use crate::error::ConvertError;
use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Multipart field that carries the presentation.
pub const FILE_FIELD: &str = "file";

/// MIME types accepted without looking at the extension.
pub const ALLOWED_MIME_TYPES: [&str; 2] = [
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

/// Extensions (lower-case, no dot) accepted without looking at the MIME type.
pub const ALLOWED_EXTENSIONS: [&str; 2] = ["ppt", "pptx"];

/// An upload that passed validation and sits in scratch storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// File name as sent by the client.
    pub original_name: String,
    /// MIME type as sent by the client.
    pub mime_type: String,
    /// Bytes written to scratch storage.
    pub size: u64,
    /// Location in scratch storage.
    pub path: PathBuf,
}

/// True if either the MIME type or the extension is a PowerPoint one.
pub fn is_powerpoint(file_name: &str, mime_type: &str) -> bool {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return true;
    }
    extension_of(file_name)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// MIME type to declare when forwarding an accepted upload.
///
/// An allow-listed client type is kept as sent; otherwise the PowerPoint
/// type matching the extension is used.
pub fn source_mime_type(file_name: &str, mime_type: &str) -> String {
    let base = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if ALLOWED_MIME_TYPES.contains(&base.as_str()) {
        return mime_type.to_string();
    }
    match extension_of(file_name).as_deref() {
        Some("ppt") => ALLOWED_MIME_TYPES[0].to_string(),
        Some("pptx") => ALLOWED_MIME_TYPES[1].to_string(),
        _ => mime_type.to_string(),
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Reduce a client-supplied name to a safe single path component.
///
/// Keeps only the final component and replaces everything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(file_name: &str) -> String {
    const MAX_LEN: usize = 100;
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return "upload".to_string();
    }
    // Keep the tail so the extension survives truncation.
    let skip = cleaned.chars().count().saturating_sub(MAX_LEN);
    cleaned.chars().skip(skip).collect()
}

/// Collision-resistant scratch name: `<unix-millis>-<8 hex>-<sanitised name>`.
pub fn scratch_file_name(original_name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", millis, &nonce[..8], sanitize_file_name(original_name))
}

/// Create the scratch directory if it does not exist yet.
pub async fn ensure_scratch_dir(dir: &Path) -> Result<(), ConvertError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ConvertError::Scratch {
            path: dir.to_path_buf(),
            source,
        })
}

/// Receive the single `file` field of `multipart` into scratch storage.
///
/// # Errors
/// All validation failures are client errors (400):
/// [`ConvertError::MissingFile`], [`ConvertError::UnsupportedFileType`],
/// [`ConvertError::FileTooLarge`], [`ConvertError::MalformedUpload`].
/// Local disk failures are [`ConvertError::Scratch`]. On any error the
/// partially written scratch file has already been removed.
pub async fn receive(
    multipart: &mut Multipart,
    config: &ServerConfig,
) -> Result<UploadedFile, ConvertError> {
    let mut received: Option<UploadedFile> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                discard(received.as_ref()).await;
                return Err(map_multipart_error(e, config));
            }
        };

        if field.name() != Some(FILE_FIELD) || field.file_name().is_none() {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }

        if received.is_some() {
            discard(received.as_ref()).await;
            return Err(ConvertError::MalformedUpload(
                "unexpected additional file field".into(),
            ));
        }

        received = Some(store_field(field, config).await?);
    }

    let upload = received.ok_or(ConvertError::MissingFile)?;
    info!(
        "Received '{}' ({}, {} bytes) into {}",
        upload.original_name,
        upload.mime_type,
        upload.size,
        upload.path.display()
    );
    Ok(upload)
}

async fn store_field(mut field: Field<'_>, config: &ServerConfig) -> Result<UploadedFile, ConvertError> {
    let original_name = field.file_name().unwrap_or_default().to_string();
    let mime_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    if !is_powerpoint(&original_name, &mime_type) {
        return Err(ConvertError::UnsupportedFileType {
            file_name: original_name,
            mime_type,
        });
    }

    ensure_scratch_dir(&config.upload_dir).await?;
    let path = config.upload_dir.join(scratch_file_name(&original_name));

    match write_chunks(&mut field, &path, config).await {
        Ok(size) => Ok(UploadedFile {
            original_name,
            mime_type,
            size,
            path,
        }),
        Err(e) => {
            remove_scratch(&path).await;
            Err(e)
        }
    }
}

async fn write_chunks(
    field: &mut Field<'_>,
    path: &Path,
    config: &ServerConfig,
) -> Result<u64, ConvertError> {
    let scratch_err = |source| ConvertError::Scratch {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(path).await.map_err(scratch_err)?;
    let mut total: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| map_multipart_error(e, config))?
    {
        total += chunk.len() as u64;
        if total > config.max_upload_bytes {
            warn!(
                "Upload exceeds {} bytes, aborting at {} bytes",
                config.max_upload_bytes, total
            );
            return Err(ConvertError::FileTooLarge {
                limit_bytes: config.max_upload_bytes,
            });
        }
        file.write_all(&chunk).await.map_err(scratch_err)?;
    }

    file.flush().await.map_err(scratch_err)?;
    Ok(total)
}

fn map_multipart_error(e: MultipartError, config: &ServerConfig) -> ConvertError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ConvertError::FileTooLarge {
            limit_bytes: config.max_upload_bytes,
        }
    } else {
        ConvertError::MalformedUpload(e.body_text())
    }
}

async fn discard(upload: Option<&UploadedFile>) {
    if let Some(upload) = upload {
        remove_scratch(&upload.path).await;
    }
}

async fn remove_scratch(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove scratch file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PPTX_MIME: &str =
        "application/vnd.openxmlformats-officedocument.presentationml.presentation";

    #[test]
    fn accepts_by_mime_or_extension() {
        assert!(is_powerpoint("deck.pptx", PPTX_MIME));
        assert!(is_powerpoint("deck.bin", "application/vnd.ms-powerpoint"));
        assert!(is_powerpoint("Slides.PPT", "application/octet-stream"));
        assert!(is_powerpoint("deck", "application/vnd.ms-powerpoint; charset=binary"));
    }

    #[test]
    fn rejects_when_both_fail() {
        assert!(!is_powerpoint("notes.txt", "text/plain"));
        assert!(!is_powerpoint("deck.pptx.exe", "application/octet-stream"));
        assert!(!is_powerpoint("deck.key", "application/x-iwork-keynote-sffkey"));
        assert!(!is_powerpoint("", ""));
    }

    #[test]
    fn source_mime_falls_back_to_extension() {
        assert_eq!(
            source_mime_type("deck.pptx", "application/octet-stream"),
            PPTX_MIME
        );
        assert_eq!(
            source_mime_type("Slides.PPT", ""),
            "application/vnd.ms-powerpoint"
        );
        assert_eq!(
            source_mime_type("deck.bin", "application/vnd.ms-powerpoint"),
            "application/vnd.ms-powerpoint"
        );
        assert_eq!(source_mime_type("deck.pptx", PPTX_MIME), PPTX_MIME);
    }

    #[test]
    fn sanitize_strips_directories_and_odd_chars() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\Q3 deck.pptx"), "Q3_deck.pptx");
        assert_eq!(sanitize_file_name("résumé.ppt"), "r_sum_.ppt");
        assert_eq!(sanitize_file_name(".hidden.pptx"), "hidden.pptx");
        assert_eq!(sanitize_file_name("///"), "upload");
    }

    #[test]
    fn sanitize_keeps_extension_when_truncating() {
        let long = format!("{}.pptx", "a".repeat(300));
        let cleaned = sanitize_file_name(&long);
        assert_eq!(cleaned.len(), 100);
        assert!(cleaned.ends_with(".pptx"));
    }

    #[test]
    fn scratch_names_are_unique_for_the_same_upload() {
        let a = scratch_file_name("deck.pptx");
        let b = scratch_file_name("deck.pptx");
        assert_ne!(a, b);
        assert!(a.ends_with("-deck.pptx"), "got: {a}");
    }

    #[tokio::test]
    async fn ensure_scratch_dir_creates_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a/b/uploads");
        ensure_scratch_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
        // Idempotent.
        ensure_scratch_dir(&dir).await.unwrap();
    }
}
