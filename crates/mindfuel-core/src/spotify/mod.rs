//! Spotify integration for in-app music playback.
//!
//! This module provides:
//! - `SpotifyAuth`: authorize URL, code exchange, token refresh and the
//!   persisted access/refresh/expiry keys
//! - `Handshake` / `PopupHandle`: the popup authorization flow, bounded
//!   by a five-minute timeout, plus a pending-authorization variant whose
//!   `state` survives in the token store between processes
//!
//! These tokens are independent of the MindFuel session.

pub mod auth;
pub mod handshake;

pub use auth::{SpotifyAuth, SpotifyConfig, SpotifyRefresh, SpotifyTokens};
pub use handshake::{
    CallbackParams, Handshake, HandshakeOutcome, PopupHandle, PopupMessage, HANDSHAKE_TIMEOUT,
};
