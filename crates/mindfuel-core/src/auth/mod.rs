//! Authentication module for managing the user's session.
//!
//! This module provides:
//! - `SessionManager`: login, registration, single-flight refresh, logout
//! - `SessionStore`: persisted token pair and derived identity queries
//! - `AuthService`: the backend's `/auth/*` endpoints
//! - `token`: unverified JWT payload decoding (fail-closed)
//! - `guard`: route decisions for protected, public and onboarding pages

pub mod guard;
pub mod manager;
pub mod service;
pub mod session;
pub mod token;

pub use guard::RouteDecision;
pub use manager::{RefreshOutcome, SessionManager, SessionState, EXPIRY_CHECK_INTERVAL};
pub use service::AuthService;
pub use session::SessionStore;
pub use token::{DecodeError, DecodedIdentity};
