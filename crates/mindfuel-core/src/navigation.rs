//! Client-side navigation hooks.
//!
//! The session manager performs exactly one navigation on its own: a hard
//! redirect to the login page when a refresh fails. Everything else is
//! returned to the caller as a `RouteDecision`.

use std::sync::Mutex;

use tracing::info;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/";
pub const DASHBOARD_PATH: &str = "/dashboard";
pub const ONBOARDING_PATH: &str = "/onboarding";

pub trait Navigator: Send + Sync {
    fn redirect(&self, path: &str);
}

/// Logs redirects and otherwise does nothing.
#[derive(Debug, Default)]
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn redirect(&self, path: &str) {
        info!(path = path, "Redirect requested");
    }
}

/// Remembers every redirect, for callers that poll instead of react.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    paths: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirects(&self) -> Vec<String> {
        self.paths.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn last_redirect(&self) -> Option<String> {
        self.paths.lock().ok().and_then(|p| p.last().cloned())
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, path: &str) {
        info!(path = path, "Redirect requested");
        if let Ok(mut paths) = self.paths.lock() {
            paths.push(path.to_string());
        }
    }
}
