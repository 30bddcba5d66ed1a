use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::auth::service::REQUEST_TIMEOUT_SECS;
use crate::storage::{keys, TokenStore};

pub const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Callback path on the web app origin
pub const CALLBACK_PATH: &str = "/auth/spotify/callback";

pub const SCOPES: [&str; 6] = [
    "streaming",
    "user-read-email",
    "user-read-private",
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-read-currently-playing",
];

/// Treat the access token as expired this long before it actually is.
pub const EXPIRY_BUFFER_MS: i64 = 5 * 60 * 1000;

const STATE_LENGTH: usize = 16;

#[derive(Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl SpotifyConfig {
    /// `redirect_uri` defaults to the callback path on `app_origin`.
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: Option<String>,
        app_origin: &str,
    ) -> Self {
        let redirect_uri = redirect_uri.unwrap_or_else(|| {
            format!("{}{}", app_origin.trim_end_matches('/'), CALLBACK_PATH)
        });
        Self {
            client_id,
            client_secret,
            redirect_uri,
        }
    }
}

impl std::fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Token endpoint response for an authorization code.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds
    pub expires_in: i64,
}

impl std::fmt::Debug for SpotifyTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyTokens")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Token endpoint response for a refresh. Spotify may rotate the refresh
/// token, in which case it is included.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyRefresh {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Spotify OAuth client plus persistence of the resulting tokens.
/// Clone is cheap.
#[derive(Clone)]
pub struct SpotifyAuth {
    client: Client,
    config: SpotifyConfig,
    store: Arc<dyn TokenStore>,
    authorize_endpoint: Url,
    token_endpoint: Url,
}

impl SpotifyAuth {
    pub fn new(config: SpotifyConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        Self::with_endpoints(config, store, AUTHORIZE_URL, TOKEN_URL)
    }

    /// Point at non-default endpoints, e.g. a mock server
    pub fn with_endpoints(
        config: SpotifyConfig,
        store: Arc<dyn TokenStore>,
        authorize_url: &str,
        token_url: &str,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            config,
            store,
            authorize_endpoint: Url::parse(authorize_url).context("Invalid authorize URL")?,
            token_endpoint: Url::parse(token_url).context("Invalid token URL")?,
        })
    }

    pub fn config(&self) -> &SpotifyConfig {
        &self.config
    }

    /// Random value for the `state` parameter
    pub fn random_state() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_LENGTH)
            .map(char::from)
            .collect()
    }

    pub fn authorize_url(&self, state: &str) -> Url {
        let mut url = self.authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state);
        url
    }

    /// Redeem a one-time authorization code
    pub async fn exchange_code(&self, code: &str) -> Result<SpotifyTokens, ApiError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        self.token_request(&form, "Failed to exchange code for token").await
    }

    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<SpotifyRefresh, ApiError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&form, "Failed to refresh access token").await
    }

    async fn token_request<T: serde::de::DeserializeOwned>(
        &self,
        form: &[(&str, &str)],
        failure_message: &str,
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(self.token_endpoint.clone())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "Spotify token endpoint rejected request");
            return Err(ApiError::AuthFailure(failure_message.to_string()));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    // ===== Persistence =====

    /// Out-of-range lifetimes are rejected before anything is written.
    pub fn store_tokens(&self, tokens: &SpotifyTokens, now: DateTime<Utc>) -> Result<()> {
        let expires_at_ms = expiry_ms(tokens.expires_in, now)?;
        self.store.set(keys::SPOTIFY_ACCESS_TOKEN, &tokens.access_token)?;
        self.store.set(keys::SPOTIFY_REFRESH_TOKEN, &tokens.refresh_token)?;
        self.store.set(keys::SPOTIFY_TOKEN_EXPIRES, &expires_at_ms.to_string())
    }

    pub fn clear_tokens(&self) {
        for key in [
            keys::SPOTIFY_ACCESS_TOKEN,
            keys::SPOTIFY_REFRESH_TOKEN,
            keys::SPOTIFY_TOKEN_EXPIRES,
        ] {
            if let Err(e) = self.store.remove(key) {
                warn!(key = key, error = %e, "Failed to remove Spotify token");
            }
        }
    }

    /// Raw stored access token, without any expiry check
    pub fn stored_access_token(&self) -> Option<String> {
        self.read(keys::SPOTIFY_ACCESS_TOKEN)
    }

    fn stored_expiry_ms(&self) -> Option<i64> {
        self.read(keys::SPOTIFY_TOKEN_EXPIRES).and_then(|v| v.trim().parse().ok())
    }

    // An unreadable store behaves like an empty one.
    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read Spotify token store");
                None
            }
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub async fn valid_access_token(&self) -> Option<String> {
        self.valid_access_token_at(Utc::now()).await
    }

    /// Stored access token if it is outside the expiry buffer. Inside the
    /// buffer a refresh is attempted and its token returned on success.
    pub async fn valid_access_token_at(&self, now: DateTime<Utc>) -> Option<String> {
        let token = self.stored_access_token()?;
        let expires_at_ms = self.stored_expiry_ms()?;

        if now.timestamp_millis() >= expires_at_ms.saturating_sub(EXPIRY_BUFFER_MS) {
            debug!("Spotify token inside expiry buffer, refreshing");
            return self.refresh_stored(now).await;
        }

        Some(token)
    }

    /// Refresh using the stored refresh token. Any failure clears all
    /// Spotify tokens.
    async fn refresh_stored(&self, now: DateTime<Utc>) -> Option<String> {
        let Some(refresh_token) = self.read(keys::SPOTIFY_REFRESH_TOKEN) else {
            self.clear_tokens();
            return None;
        };

        let refreshed = match self.refresh_access_token(&refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(error = %e, "Failed to refresh Spotify token");
                self.clear_tokens();
                return None;
            }
        };

        let stored = expiry_ms(refreshed.expires_in, now)
            .and_then(|expires_at_ms| {
                self.store.set(keys::SPOTIFY_ACCESS_TOKEN, &refreshed.access_token)?;
                self.store.set(keys::SPOTIFY_TOKEN_EXPIRES, &expires_at_ms.to_string())
            })
            .and_then(|_| match refreshed.refresh_token.as_deref() {
                Some(rotated) => self.store.set(keys::SPOTIFY_REFRESH_TOKEN, rotated),
                None => Ok(()),
            });
        if let Err(e) = stored {
            warn!(error = %e, "Failed to store refreshed Spotify token");
            self.clear_tokens();
            return None;
        }

        Some(refreshed.access_token)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.valid_access_token().await.is_some()
    }
}

/// Epoch milliseconds `expires_in` seconds after `now`.
fn expiry_ms(expires_in: i64, now: DateTime<Utc>) -> Result<i64> {
    expires_in
        .checked_mul(1000)
        .and_then(|ms| now.timestamp_millis().checked_add(ms))
        .ok_or_else(|| anyhow!("Token lifetime out of range: {} seconds", expires_in))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn config() -> SpotifyConfig {
        SpotifyConfig::new(
            "client-id".to_string(),
            "client-secret".to_string(),
            None,
            "http://localhost:3000/",
        )
    }

    #[test]
    fn test_default_redirect_uri() {
        assert_eq!(config().redirect_uri, "http://localhost:3000/auth/spotify/callback");
    }

    #[test]
    fn test_authorize_url() {
        let auth = SpotifyAuth::new(config(), Arc::new(MemoryStore::new())).unwrap();
        let url = auth.authorize_url("xyz123");
        assert_eq!(url.host_str(), Some("accounts.spotify.com"));
        assert_eq!(url.path(), "/authorize");

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-id");
        assert_eq!(pairs["state"], "xyz123");
        assert_eq!(pairs["redirect_uri"], "http://localhost:3000/auth/spotify/callback");
        assert_eq!(pairs["scope"].split(' ').count(), SCOPES.len());
        assert!(pairs["scope"].contains("streaming"));
    }

    #[test]
    fn test_random_state() {
        let a = SpotifyAuth::random_state();
        let b = SpotifyAuth::random_state();
        assert_eq!(a.len(), STATE_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_hides_secret() {
        let printed = format!("{:?}", config());
        assert!(!printed.contains("client-secret"));
    }

    #[tokio::test]
    async fn test_valid_token_outside_buffer() {
        let auth = SpotifyAuth::new(config(), Arc::new(MemoryStore::new())).unwrap();
        let now = Utc::now();
        let tokens = SpotifyTokens {
            access_token: "spotify-access".to_string(),
            refresh_token: "spotify-refresh".to_string(),
            expires_in: 3600,
        };
        auth.store_tokens(&tokens, now).unwrap();

        assert_eq!(auth.valid_access_token_at(now).await.as_deref(), Some("spotify-access"));
        // Six minutes before expiry is still outside the buffer
        let later = now + chrono::Duration::minutes(54);
        assert_eq!(auth.valid_access_token_at(later).await.as_deref(), Some("spotify-access"));
    }

    #[tokio::test]
    async fn test_missing_tokens() {
        let auth = SpotifyAuth::new(config(), Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(auth.valid_access_token().await, None);
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_inside_buffer_without_refresh_token_clears() {
        let store = Arc::new(MemoryStore::new());
        let auth = SpotifyAuth::new(config(), store.clone()).unwrap();
        let now = Utc::now();
        store.set(keys::SPOTIFY_ACCESS_TOKEN, "spotify-access").unwrap();
        store
            .set(keys::SPOTIFY_TOKEN_EXPIRES, &(now.timestamp_millis() + 60_000).to_string())
            .unwrap();

        assert_eq!(auth.valid_access_token_at(now).await, None);
        assert_eq!(auth.stored_access_token(), None);
        assert_eq!(store.get(keys::SPOTIFY_TOKEN_EXPIRES).unwrap(), None);
    }

    #[test]
    fn test_oversized_lifetime_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let auth = SpotifyAuth::new(config(), store.clone()).unwrap();
        let tokens = SpotifyTokens {
            access_token: "spotify-access".to_string(),
            refresh_token: "spotify-refresh".to_string(),
            expires_in: i64::MAX / 100,
        };

        assert!(auth.store_tokens(&tokens, Utc::now()).is_err());
        assert_eq!(store.get(keys::SPOTIFY_ACCESS_TOKEN).unwrap(), None);
        assert_eq!(store.get(keys::SPOTIFY_TOKEN_EXPIRES).unwrap(), None);
    }

    #[tokio::test]
    async fn test_extreme_stored_expiry_counts_as_expired() {
        let store = Arc::new(MemoryStore::new());
        let auth = SpotifyAuth::new(config(), store.clone()).unwrap();
        store.set(keys::SPOTIFY_ACCESS_TOKEN, "spotify-access").unwrap();
        store.set(keys::SPOTIFY_TOKEN_EXPIRES, &i64::MIN.to_string()).unwrap();

        // No refresh token, so the buffered refresh clears everything
        assert_eq!(auth.valid_access_token_at(Utc::now()).await, None);
        assert_eq!(auth.stored_access_token(), None);
    }

    #[tokio::test]
    async fn test_unreadable_store_reads_as_disconnected() {
        struct BrokenStore;

        impl TokenStore for BrokenStore {
            fn get(&self, _key: &str) -> Result<Option<String>> {
                Err(anyhow!("unavailable"))
            }
            fn set(&self, _key: &str, _value: &str) -> Result<()> {
                Err(anyhow!("unavailable"))
            }
            fn remove(&self, _key: &str) -> Result<()> {
                Err(anyhow!("unavailable"))
            }
        }

        let auth = SpotifyAuth::new(config(), Arc::new(BrokenStore)).unwrap();
        assert_eq!(auth.stored_access_token(), None);
        assert!(!auth.is_authenticated().await);
    }
}
