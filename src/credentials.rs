//! OAuth credential store and access-token cache.
//!
//! The remote service is reached with a long-lived refresh token that the
//! operator minted out of band. At startup [`Credentials::from_env`] reads
//! the four required variables; the binary exits if any is missing.
//!
//! [`TokenManager`] exchanges the refresh token for short-lived access
//! tokens and caches the current one until shortly before it expires. It is
//! shared by every request through the long-lived remote client.

use crate::error::{ConvertError, RemoteError};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

pub const ENV_CLIENT_ID: &str = "GOOGLE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "GOOGLE_CLIENT_SECRET";
pub const ENV_REDIRECT_URI: &str = "GOOGLE_REDIRECT_URI";
pub const ENV_REFRESH_TOKEN: &str = "GOOGLE_REFRESH_TOKEN";

/// Refresh this long before the provider-reported expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// OAuth client credentials plus the operator's refresh token.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub refresh_token: String,
}

impl Credentials {
    /// Load credentials from the process environment.
    pub fn from_env() -> Result<Self, ConvertError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load credentials through an arbitrary variable lookup.
    ///
    /// Unset and empty (after trimming) values both count as missing; the
    /// first missing variable is reported.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConvertError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConvertError::MissingCredential { var })
        };

        Ok(Self {
            client_id: require(ENV_CLIENT_ID)?,
            client_secret: require(ENV_CLIENT_SECRET)?,
            redirect_uri: require(ENV_REDIRECT_URI)?,
            refresh_token: require(ENV_REFRESH_TOKEN)?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

/// Mints and caches access tokens via the refresh-token grant.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    credentials: Credentials,
    cached: RwLock<Option<CachedToken>>,
    /// Serialises refreshes so concurrent requests share one token call.
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, token_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            credentials,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Return a valid access token, refreshing if needed.
    pub async fn access_token(&self) -> Result<String, RemoteError> {
        if let Some(token) = self.fresh_cached().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_cached().await {
            return Ok(token);
        }
        self.refresh().await
    }

    /// Drop the cached token so the next call mints a new one.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        debug!("Cached access token invalidated");
    }

    async fn fresh_cached(&self) -> Option<String> {
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|t| t.is_fresh())
            .map(|t| t.value.clone())
    }

    async fn refresh(&self) -> Result<String, RemoteError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| RemoteError::Token(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Token endpoint returned HTTP {}", status.as_u16());
            return Err(RemoteError::Token(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Token(format!("malformed token response: {e}")))?;

        // Tokens without an expiry are treated as one-hour tokens.
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        debug!("Minted access token valid for {}s", lifetime.as_secs());

        *self.cached.write().await = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (ENV_CLIENT_ID, "client-123"),
            (ENV_CLIENT_SECRET, "shh"),
            (ENV_REDIRECT_URI, "http://localhost:3000/oauth2callback"),
            (ENV_REFRESH_TOKEN, "1//refresh"),
        ])
    }

    #[test]
    fn loads_all_four_variables() {
        let env = full_env();
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(creds.client_id, "client-123");
        assert_eq!(creds.refresh_token, "1//refresh");
    }

    #[test]
    fn missing_variable_is_named() {
        let mut env = full_env();
        env.remove(ENV_REFRESH_TOKEN);
        let err = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::MissingCredential { var: ENV_REFRESH_TOKEN }
        ));
    }

    #[test]
    fn blank_variable_counts_as_missing() {
        let mut env = full_env();
        env.insert(ENV_CLIENT_SECRET, "   ");
        let err = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains(ENV_CLIENT_SECRET));
    }

    #[test]
    fn debug_redacts_secrets() {
        let env = full_env();
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("shh"));
        assert!(!dbg.contains("1//refresh"));
        assert!(dbg.contains("client-123"));
    }

    #[test]
    fn cached_token_freshness_respects_margin() {
        let stale = CachedToken {
            value: "a".into(),
            expires_at: Instant::now() + Duration::from_secs(30),
        };
        let fresh = CachedToken {
            value: "b".into(),
            expires_at: Instant::now() + Duration::from_secs(600),
        };
        assert!(!stale.is_fresh());
        assert!(fresh.is_fresh());
    }
}
