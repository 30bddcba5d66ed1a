//! Data models shared between the session manager and its callers.
//!
//! - `User`: the backend's user record
//! - `AuthTokens`: the bearer/refresh token pair
//! - Request and response bodies for the `/auth/*` endpoints

pub mod user;

pub use user::{AuthResponse, AuthTokens, LoginRequest, RefreshResponse, RegisterRequest, User};
