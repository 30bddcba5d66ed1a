//! Unverified JWT payload decoding.
//!
//! The access token's signature is never checked here. The decoded identity
//! is a client-side convenience view only and must not be used for
//! authorization decisions.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Base64url that accepts the payload with or without `=` padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Token has no payload segment")]
    MissingPayload,

    #[error("Token payload is not valid base64url: {0}")]
    Base64(String),

    #[error("Token payload is not valid JSON claims: {0}")]
    Claims(String),
}

/// Claims the backend places in the access token.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "firstName", default)]
    pub first_name: String,
    #[serde(rename = "lastName", default)]
    pub last_name: String,
    /// Seconds since epoch. Numeric dates may carry a fraction.
    pub exp: f64,
    #[serde(default)]
    pub iat: Option<f64>,
    #[serde(rename = "isOnboardComplete", default)]
    pub is_onboard_complete: Option<bool>,
}

/// Identity derived from the current access token. Recomputed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct DecodedIdentity {
    pub subject_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub expires_at_epoch_seconds: i64,
    pub issued_at_epoch_seconds: Option<i64>,
    /// `None` when the claim is absent from the token.
    pub onboarding_complete: Option<bool>,
}

impl DecodedIdentity {
    /// Whole seconds on both sides: a fractional `exp` expires at the
    /// start of its second.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at_epoch_seconds <= now.timestamp()
    }

    /// Absent and `false` both count as incomplete.
    pub fn needs_onboarding(&self) -> bool {
        self.onboarding_complete != Some(true)
    }
}

impl From<Claims> for DecodedIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            subject_id: claims.sub,
            email: claims.email,
            first_name: claims.first_name,
            last_name: claims.last_name,
            expires_at_epoch_seconds: claims.exp.floor() as i64,
            issued_at_epoch_seconds: claims.iat.map(|iat| iat.floor() as i64),
            onboarding_complete: claims.is_onboard_complete,
        }
    }
}

/// Decode the payload segment of a JWT without verifying it.
pub fn decode_claims(token: &str) -> Result<Claims, DecodeError> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or(DecodeError::MissingPayload)?;

    let bytes = PAYLOAD_ENGINE
        .decode(payload)
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| DecodeError::Claims(e.to_string()))
}

pub fn decode_identity(token: &str) -> Result<DecodedIdentity, DecodeError> {
    decode_claims(token).map(DecodedIdentity::from)
}

/// Fail-closed expiry check: anything that does not decode is expired.
/// Agrees with `DecodedIdentity::is_expired_at` for every `exp`.
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match decode_identity(token) {
        Ok(identity) => identity.is_expired_at(now),
        Err(_) => true,
    }
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

/// Build an unsigned token carrying `claims`. Only useful for tests and
/// local tooling; the signature segment is a fixed placeholder.
pub fn encode_unsigned(claims: &serde_json::Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = engine.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}
