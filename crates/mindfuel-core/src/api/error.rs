use std::sync::Arc;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Login, registration or refresh rejected by the backend.
    #[error("{0}")]
    AuthFailure(String),

    /// Non-2xx response. `message` comes from the body when it has one.
    #[error("{message}")]
    Http { status: StatusCode, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Token storage error: {0}")]
    Storage(String),

    /// The stored access token cannot be sent as a header value.
    #[error("Unusable access token: {0}")]
    InvalidToken(String),

    /// A refresh on the request path failed; the session has been cleared.
    #[error("Session expired: {0}")]
    SessionExpired(Arc<ApiError>),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    // FastAPI reports errors under `detail`
    detail: Option<serde_json::Value>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// The server-provided message in an error body, if the body is
    /// structured and carries one.
    pub fn server_message(body: &str) -> Option<String> {
        let parsed: ErrorBody = serde_json::from_str(body).ok()?;
        if let Some(message) = parsed.message.filter(|m| !m.is_empty()) {
            return Some(Self::truncate_body(&message));
        }
        match parsed.detail? {
            serde_json::Value::String(detail) if !detail.is_empty() => {
                Some(Self::truncate_body(&detail))
            }
            _ => None,
        }
    }

    pub fn status_message(status: StatusCode) -> String {
        format!("HTTP error! status: {}", status.as_u16())
    }

    /// Error for a non-2xx response on the request path.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = Self::server_message(body).unwrap_or_else(|| Self::status_message(status));
        ApiError::Http { status, message }
    }

    /// Error for a rejected auth call, falling back to `default_message`.
    pub fn auth_failure(body: &str, default_message: &str) -> Self {
        ApiError::AuthFailure(
            Self::server_message(body).unwrap_or_else(|| default_message.to_string()),
        )
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            ApiError::SessionExpired(inner) => inner.status(),
            _ => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        match self {
            ApiError::AuthFailure(_) => true,
            ApiError::SessionExpired(inner) => inner.is_auth_failure(),
            _ => false,
        }
    }
}
