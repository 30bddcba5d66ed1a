//! Calls to the backend's `/auth/*` endpoints.
//!
//! `AuthService` is stateless; persisting the returned tokens is the
//! session manager's job.

use std::time::Duration;

use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::api::ApiError;
use crate::models::{AuthResponse, AuthTokens, LoginRequest, RefreshResponse, RegisterRequest};

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

pub const NO_REFRESH_TOKEN: &str = "No refresh token available";
const LOGIN_FAILED: &str = "Login failed";
const REGISTRATION_FAILED: &str = "Registration failed";
const REFRESH_FAILED: &str = "Token refresh failed";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthService {
    client: Client,
    base_url: String,
}

impl AuthService {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let response = self
            .post("/auth/login", &LoginRequest { email, password })
            .await?;
        Self::parse_or_fail(response, LOGIN_FAILED).await
    }

    pub async fn register(&self, fields: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        let response = self.post("/auth/register", fields).await?;
        Self::parse_or_fail(response, REGISTRATION_FAILED).await
    }

    /// Exchange a refresh token for a new token pair
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, ApiError> {
        let response = self
            .post("/auth/refresh", &RefreshRequest { refresh_token })
            .await?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "Refresh rejected");
            return Err(ApiError::AuthFailure(REFRESH_FAILED.to_string()));
        }

        let body: RefreshResponse = Self::parse(response).await?;
        Ok(body.tokens)
    }

    /// Revoke a refresh token. The response body is ignored.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let response = self
            .post("/auth/logout", &RefreshRequest { refresh_token })
            .await?;
        debug!(status = %response.status(), "Logout acknowledged");
        Ok(())
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST");
        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;
        Ok(response)
    }

    async fn parse_or_fail<T: DeserializeOwned>(
        response: Response,
        default_message: &str,
    ) -> Result<T, ApiError> {
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::auth_failure(&body, default_message));
        }
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let service = AuthService::new("http://localhost:8000/api/").unwrap();
        assert_eq!(service.base_url(), "http://localhost:8000/api");
    }

    #[test]
    fn test_refresh_request_shape() {
        let body = serde_json::to_value(RefreshRequest { refresh_token: "r.s.t" }).unwrap();
        assert_eq!(body, serde_json::json!({ "refreshToken": "r.s.t" }));
    }
}
