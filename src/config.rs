//! Configuration types for the conversion service.
//!
//! Scratch location, upload ceiling, readiness strategy and remote endpoints
//! live in [`ServerConfig`], built through [`ServerConfigBuilder`]. OAuth
//! secrets are not part of it; they come from the environment via
//! [`crate::credentials::Credentials`], so the config is safe to log with
//! `{:?}`.

use crate::error::ConvertError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server-side upload ceiling: 50 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Fixed wait between remote create and export.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Bound on each individual remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for the conversion service.
///
/// Built via [`ServerConfig::builder()`] or [`ServerConfig::default()`].
///
/// # Example
/// ```rust
/// use ppt2pdf::ServerConfig;
///
/// let config = ServerConfig::builder()
///     .port(8080)
///     .upload_dir("/var/tmp/ppt2pdf")
///     .build()
///     .unwrap();
/// assert_eq!(config.port, 8080);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind. Default: `0.0.0.0`.
    pub host: String,

    /// TCP port. Default: 3000.
    pub port: u16,

    /// Scratch directory for uploads and generated PDFs. Default: `uploads`.
    ///
    /// Created at startup if missing. Files are removed after every request;
    /// anything left behind comes from a cleanup step that itself failed.
    pub upload_dir: PathBuf,

    /// Largest accepted upload in bytes. Default: 50 MiB.
    pub max_upload_bytes: u64,

    /// How the orchestrator waits between remote create and export.
    pub readiness: Readiness,

    /// Per-remote-call timeout. `None` disables it. Default: 120 s.
    pub remote_timeout: Option<Duration>,

    /// Remote endpoint base URLs.
    pub endpoints: RemoteEndpoints,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            readiness: Readiness::default(),
            remote_timeout: Some(DEFAULT_REMOTE_TIMEOUT),
            endpoints: RemoteEndpoints::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new builder for `ServerConfig`.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: Self::default(),
        }
    }

    /// `host:port` as a socket address.
    pub fn bind_address(&self) -> Result<SocketAddr, ConvertError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConvertError::InvalidConfig(format!("bad bind address: {e}")))
    }

    /// Body limit handed to the HTTP layer.
    ///
    /// Leaves room for multipart framing so the upload receiver's own byte
    /// counter is what normally rejects oversized files.
    pub fn body_limit(&self) -> usize {
        const MULTIPART_OVERHEAD: u64 = 64 * 1024;
        usize::try_from(self.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD))
            .unwrap_or(usize::MAX)
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    /// Shorthand for a fixed settle delay.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.readiness = Readiness::FixedDelay(delay);
        self
    }

    pub fn readiness(mut self, readiness: Readiness) -> Self {
        self.config.readiness = readiness;
        self
    }

    pub fn remote_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.remote_timeout = timeout;
        self
    }

    pub fn endpoints(mut self, endpoints: RemoteEndpoints) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServerConfig, ConvertError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "max upload size must be ≥ 1 byte".into(),
            ));
        }
        if c.upload_dir.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "upload directory must not be empty".into(),
            ));
        }
        if let Readiness::Poll { max_attempts, .. } = c.readiness {
            if max_attempts == 0 {
                return Err(ConvertError::InvalidConfig(
                    "readiness polling needs at least one attempt".into(),
                ));
            }
        }
        if matches!(c.remote_timeout, Some(t) if t.is_zero()) {
            return Err(ConvertError::InvalidConfig(
                "remote timeout must be positive; use None to disable it".into(),
            ));
        }
        for (name, url) in [
            ("token URL", &c.endpoints.token_url),
            ("API base URL", &c.endpoints.api_base_url),
            ("upload base URL", &c.endpoints.upload_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConvertError::InvalidConfig(format!(
                    "{name} must be an http(s) URL, got '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the orchestrator decides the remote document is ready to export.
///
/// The remote service transcodes asynchronously after create returns and
/// offers no completion signal on the create response. `FixedDelay` simply
/// waits; `Poll` asks the service's metadata endpoint until the document
/// reports its converted type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Sleep for the given duration, then export. (default: 2 s)
    FixedDelay(Duration),
    /// Check readiness every `interval`, giving up after `max_attempts`.
    Poll { interval: Duration, max_attempts: u32 },
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness::FixedDelay(DEFAULT_SETTLE_DELAY)
    }
}

/// Base URLs of the remote document service.
///
/// Overridable so the client can be pointed at a proxy or a mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoints {
    /// OAuth 2.0 token endpoint.
    pub token_url: String,
    /// Base for metadata, export and delete calls.
    pub api_base_url: String,
    /// Base for media uploads.
    pub upload_base_url: String,
}

impl Default for RemoteEndpoints {
    fn default() -> Self {
        Self {
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            api_base_url: "https://www.googleapis.com".to_string(),
            upload_base_url: "https://www.googleapis.com".to_string(),
        }
    }
}

impl RemoteEndpoints {
    /// Point every endpoint at one base URL (token at `{base}/token`).
    pub fn all_at(base: impl AsRef<str>) -> Self {
        let base = base.as_ref().trim_end_matches('/');
        Self {
            token_url: format!("{base}/token"),
            api_base_url: base.to_string(),
            upload_base_url: base.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let c = ServerConfig::default();
        assert_eq!(c.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(c.readiness, Readiness::FixedDelay(Duration::from_secs(2)));
        assert_eq!(c.port, 3000);
        assert_eq!(c.upload_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn builder_rejects_zero_ceiling() {
        let err = ServerConfig::builder().max_upload_bytes(0).build().unwrap_err();
        assert!(matches!(err, ConvertError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_poll_attempts() {
        let err = ServerConfig::builder()
            .readiness(Readiness::Poll {
                interval: Duration::from_millis(100),
                max_attempts: 0,
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("at least one attempt"));
    }

    #[test]
    fn builder_rejects_non_http_endpoints() {
        let err = ServerConfig::builder()
            .endpoints(RemoteEndpoints::all_at("ftp://example.com"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("http(s) URL"), "got: {err}");
    }

    #[test]
    fn body_limit_leaves_room_for_framing() {
        let c = ServerConfig::builder().max_upload_bytes(1024).build().unwrap();
        assert!(c.body_limit() > 1024);
    }

    #[test]
    fn bind_address_parses() {
        let c = ServerConfig::builder().host("127.0.0.1").port(8081).build().unwrap();
        assert_eq!(c.bind_address().unwrap().to_string(), "127.0.0.1:8081");
    }

    #[test]
    fn endpoints_all_at_trims_trailing_slash() {
        let e = RemoteEndpoints::all_at("http://localhost:9000/");
        assert_eq!(e.token_url, "http://localhost:9000/token");
        assert_eq!(e.api_base_url, "http://localhost:9000");
    }
}
