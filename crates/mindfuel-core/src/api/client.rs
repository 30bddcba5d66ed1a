//! API client for authenticated requests to the MindFuel backend.
//!
//! Every request carries the current bearer token. An expired token is
//! refreshed before the request is built, and a 401 response triggers one
//! refresh and exactly one retry.

use std::sync::Arc;

use reqwest::{header, Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::{token, SessionManager};

use super::ApiError;

/// Clone is cheap - the connection pool and session manager are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionManager>,
}

impl ApiClient {
    /// Create a client that shares the session manager's connection pool
    /// and base URL.
    pub fn new(session: Arc<SessionManager>) -> Self {
        let client = session.service().client().clone();
        let base_url = session.service().base_url().to_string();
        Self {
            client,
            base_url,
            session,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn bearer_headers(token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidToken(e.to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Headers for the next request, refreshing first if the stored token
    /// has expired.
    async fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let Some(access_token) = self.session.access_token() else {
            return Self::bearer_headers(None);
        };

        if token::is_expired(&access_token) {
            debug!("Access token expired, refreshing before request");
            self.session
                .refresh_shared()
                .await
                .map_err(ApiError::SessionExpired)?;
            return Self::bearer_headers(self.session.access_token().as_deref());
        }

        Self::bearer_headers(Some(&access_token))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: &Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Response, ApiError> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(self.auth_headers().await?);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Issue a request against `endpoint` (relative to the base URL).
    pub async fn request<T, B>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(method = %method, url = %url, "API request");

        let response = self.send(&method, &url, body).await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.session.refresh_token().is_some() {
            debug!(url = %url, "Unauthorized, refreshing and retrying once");
            self.session
                .refresh_shared()
                .await
                .map_err(ApiError::SessionExpired)?;

            let retry = self.send(&method, &url, body).await?;
            let status = retry.status();
            if !status.is_success() {
                warn!(url = %url, status = %status, "Retry after refresh failed");
                return Err(ApiError::Http {
                    status,
                    message: ApiError::status_message(status),
                });
            }
            return Self::parse(retry).await;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "API request failed");
            return Err(ApiError::from_status(status, &body));
        }

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        // Empty 2xx bodies deserialize as null
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    // ===== Convenience methods =====

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.request::<T, ()>(Method::GET, endpoint, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, endpoint, body).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, endpoint, body).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.request::<T, ()>(Method::DELETE, endpoint, None).await
    }
}
