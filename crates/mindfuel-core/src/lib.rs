//! Core library for MindFuel clients.
//!
//! Owns the client-side session: persisted bearer/refresh tokens, unverified
//! identity decoding, single-flight refresh, and an API client that retries
//! once after a 401. Also covers the Spotify authorization flow used for
//! in-app playback.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod navigation;
pub mod spotify;
pub mod storage;

pub use api::{ApiClient, ApiError};
pub use auth::{DecodedIdentity, RouteDecision, SessionManager, SessionState, SessionStore};
pub use config::Config;
pub use models::{AuthResponse, AuthTokens, RegisterRequest, User};
pub use navigation::Navigator;
pub use storage::TokenStore;
