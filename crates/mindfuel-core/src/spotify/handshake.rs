//! Popup-based authorization handshake.
//!
//! The browser popup is modelled as an external actor holding a
//! `PopupHandle`. It reports exactly one message (success or error) by
//! consuming the handle; dropping the handle without reporting means the
//! popup was closed. The opener waits on the `Handshake` for at most
//! `HANDSHAKE_TIMEOUT`.
//!
//! When the callback arrives in a different process (the CLI prints the
//! URL, then is run again with the redirect), the expected `state` is
//! kept in the token store instead, see `start_pending_authorization`.

use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::storage::{keys, TokenStore};

use super::auth::{SpotifyAuth, SpotifyTokens};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const STATE_MISMATCH: &str = "State mismatch";
const NO_PENDING_AUTHORIZATION: &str = "No Spotify authorization in progress";
const MISSING_CODE: &str = "Callback URL has no code";

/// Message the popup posts back to its opener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupMessage {
    Success(SpotifyTokens),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Connected,
    Failed(String),
    /// Popup closed without reporting and no token was stored meanwhile.
    Closed,
    TimedOut,
}

/// Query parameters the authorization server appends to the callback URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub state: Option<String>,
}

impl CallbackParams {
    /// Parse the full callback URL as pasted from a browser.
    pub fn parse(callback_url: &str) -> anyhow::Result<Self> {
        Ok(Self::from_url(&Url::parse(callback_url)?))
    }

    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// Opener side of a handshake.
pub struct Handshake {
    authorize_url: Url,
    receiver: oneshot::Receiver<PopupMessage>,
}

/// Popup side of a handshake. Reporting consumes it.
pub struct PopupHandle {
    expected_state: String,
    sender: oneshot::Sender<PopupMessage>,
}

impl SpotifyAuth {
    /// Start a handshake with a fresh `state` value.
    pub fn begin_handshake(&self) -> (Handshake, PopupHandle) {
        let state = Self::random_state();
        let (sender, receiver) = oneshot::channel();
        let handshake = Handshake {
            authorize_url: self.authorize_url(&state),
            receiver,
        };
        let popup = PopupHandle {
            expected_state: state,
            sender,
        };
        (handshake, popup)
    }

    /// Authorization URL for a flow whose callback is handled later,
    /// possibly by another process. The generated `state` replaces any
    /// earlier pending one.
    pub fn start_pending_authorization(&self) -> Result<Url, ApiError> {
        let state = Self::random_state();
        self.store()
            .set(keys::SPOTIFY_AUTH_STATE, &state)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;
        Ok(self.authorize_url(&state))
    }

    /// Finish a pending authorization from its callback parameters and
    /// store the tokens. The pending `state` is consumed either way, so a
    /// callback cannot be replayed.
    pub async fn finish_pending_authorization(
        &self,
        params: CallbackParams,
    ) -> Result<SpotifyTokens, ApiError> {
        let expected = self
            .store()
            .get(keys::SPOTIFY_AUTH_STATE)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?
            .ok_or_else(|| ApiError::AuthFailure(NO_PENDING_AUTHORIZATION.to_string()))?;
        if let Err(e) = self.store().remove(keys::SPOTIFY_AUTH_STATE) {
            warn!(error = %e, "Failed to remove pending Spotify state");
        }

        match callback_message(self, params, &expected).await {
            Some(PopupMessage::Success(tokens)) => {
                self.store_tokens(&tokens, Utc::now())
                    .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;
                info!("Spotify connected");
                Ok(tokens)
            }
            Some(PopupMessage::Error(error)) => Err(ApiError::AuthFailure(error)),
            None => Err(ApiError::AuthFailure(MISSING_CODE.to_string())),
        }
    }
}

/// What the callback page reports for `params`: the error if the
/// authorization server sent one, otherwise the result of redeeming the
/// code once `state` matches. `None` when there is neither.
async fn callback_message(
    auth: &SpotifyAuth,
    params: CallbackParams,
    expected_state: &str,
) -> Option<PopupMessage> {
    if let Some(error) = params.error {
        return Some(PopupMessage::Error(error));
    }
    let code = params.code?;
    if params.state.as_deref() != Some(expected_state) {
        warn!("Spotify callback state mismatch");
        return Some(PopupMessage::Error(STATE_MISMATCH.to_string()));
    }
    match auth.exchange_code(&code).await {
        Ok(tokens) => Some(PopupMessage::Success(tokens)),
        Err(e) => Some(PopupMessage::Error(e.to_string())),
    }
}

impl Handshake {
    /// URL to open in the popup
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    /// Wait for the popup's single message, bounded by `timeout`.
    pub async fn wait(self, auth: &SpotifyAuth, timeout: Duration) -> HandshakeOutcome {
        match tokio::time::timeout(timeout, self.receiver).await {
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Spotify handshake timed out");
                HandshakeOutcome::TimedOut
            }
            Ok(Err(_)) => {
                // Closed without a message; the popup may still have stored tokens
                if auth.stored_access_token().is_some() {
                    HandshakeOutcome::Connected
                } else {
                    debug!("Spotify popup closed without completing");
                    HandshakeOutcome::Closed
                }
            }
            Ok(Ok(PopupMessage::Success(tokens))) => {
                match auth.store_tokens(&tokens, Utc::now()) {
                    Ok(()) => {
                        info!("Spotify connected");
                        HandshakeOutcome::Connected
                    }
                    Err(e) => HandshakeOutcome::Failed(format!("{:#}", e)),
                }
            }
            Ok(Ok(PopupMessage::Error(error))) => {
                warn!(error = %error, "Spotify auth error");
                HandshakeOutcome::Failed(error)
            }
        }
    }
}

impl PopupHandle {
    pub fn expected_state(&self) -> &str {
        &self.expected_state
    }

    /// Run the callback page: redeem the code or forward the error, then
    /// report to the opener. With neither present, the popup just closes.
    pub async fn complete(self, auth: &SpotifyAuth, params: CallbackParams) {
        if let Some(message) = callback_message(auth, params, &self.expected_state).await {
            self.report(message);
        }
    }

    pub fn report(self, message: PopupMessage) {
        // The opener may have given up already
        if self.sender.send(message).is_err() {
            debug!("Spotify opener no longer waiting");
        }
    }
}
