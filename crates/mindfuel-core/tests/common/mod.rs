#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use mindfuel_core::auth::token::encode_unsigned;
use mindfuel_core::auth::{AuthService, SessionManager, SessionStore};
use mindfuel_core::navigation::RecordingNavigator;
use mindfuel_core::storage::MemoryStore;
use mindfuel_core::{ApiClient, AuthTokens};
use serde_json::{json, Value};
use wiremock::MockServer;

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub navigator: Arc<RecordingNavigator>,
    pub api: ApiClient,
}

pub fn harness(server: &MockServer) -> Harness {
    let navigator = Arc::new(RecordingNavigator::new());
    let session = SessionStore::new(Arc::new(MemoryStore::new()));
    let service = AuthService::new(server.uri()).expect("auth service");
    let manager = Arc::new(SessionManager::new(session, service, navigator.clone()));
    let api = ApiClient::new(manager.clone());
    Harness {
        manager,
        navigator,
        api,
    }
}

pub fn access_token(email: &str, valid_for: Duration) -> String {
    encode_unsigned(&json!({
        "sub": "665f1c2e9b1d",
        "email": email,
        "firstName": "Ada",
        "lastName": "Lovelace",
        "exp": (Utc::now() + valid_for).timestamp(),
        "iat": Utc::now().timestamp(),
        "isOnboardComplete": true,
    }))
}

pub fn live_tokens(email: &str, refresh: &str) -> AuthTokens {
    AuthTokens::new(access_token(email, Duration::hours(1)), refresh)
}

pub fn expired_tokens(email: &str, refresh: &str) -> AuthTokens {
    AuthTokens::new(access_token(email, Duration::minutes(-5)), refresh)
}

pub fn user_json(email: &str) -> Value {
    json!({
        "id": "665f1c2e9b1d",
        "email": email,
        "firstName": "Ada",
        "lastName": "Lovelace",
    })
}

pub fn tokens_json(tokens: &AuthTokens) -> Value {
    json!({
        "accessToken": tokens.access_token,
        "refreshToken": tokens.refresh_token,
    })
}
