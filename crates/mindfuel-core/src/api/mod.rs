//! REST API client module for the MindFuel backend.
//!
//! This module provides the `ApiClient` for authenticated requests and the
//! `ApiError` taxonomy shared by every network-facing part of the crate.
//!
//! The API uses JWT bearer token authentication; tokens are obtained and
//! refreshed through the session manager in `crate::auth`.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
