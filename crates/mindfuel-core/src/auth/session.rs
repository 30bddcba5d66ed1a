use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::api::ApiError;
use crate::models::AuthTokens;
use crate::storage::{keys, TokenStore};

use super::token::{self, DecodedIdentity};

/// Persisted access/refresh token pair and the queries derived from it.
/// Clone is cheap - the backing store is shared.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn TokenStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Persist both tokens, overwriting any prior session
    pub fn set_session(&self, tokens: &AuthTokens) -> Result<(), ApiError> {
        self.store
            .set(keys::ACCESS_TOKEN, &tokens.access_token)
            .and_then(|_| self.store.set(keys::REFRESH_TOKEN, &tokens.refresh_token))
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(keys::ACCESS_TOKEN)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(keys::REFRESH_TOKEN)
    }

    /// Remove both tokens
    pub fn clear_session(&self) -> Result<(), ApiError> {
        let access = self.store.remove(keys::ACCESS_TOKEN);
        let refresh = self.store.remove(keys::REFRESH_TOKEN);
        access
            .and(refresh)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))
    }

    pub fn is_expired(&self, token: &str) -> bool {
        token::is_expired(token)
    }

    pub fn current_identity(&self) -> Option<DecodedIdentity> {
        self.current_identity_at(Utc::now())
    }

    /// Identity of the current access token, `None` if absent, undecodable
    /// or expired at `now`.
    pub fn current_identity_at(&self, now: DateTime<Utc>) -> Option<DecodedIdentity> {
        let token = self.access_token()?;
        let identity = token::decode_identity(&token).ok()?;
        if identity.is_expired_at(now) {
            return None;
        }
        Some(identity)
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(Utc::now())
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.access_token()
            .map(|token| !token::is_expired_at(&token, now))
            .unwrap_or(false)
    }

    // An unreadable store behaves like an empty one.
    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read token store");
                None
            }
        }
    }
}
