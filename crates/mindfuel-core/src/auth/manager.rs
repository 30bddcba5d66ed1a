//! Session lifecycle: login, registration, refresh and logout.
//!
//! `SessionManager` is the only writer of the persisted token pair. It
//! tracks an explicit `SessionState` and coordinates refreshes so that at
//! most one refresh request is in flight at a time.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::models::{AuthResponse, AuthTokens, RegisterRequest};
use crate::navigation::{Navigator, LOGIN_PATH};

use super::service::{AuthService, NO_REFRESH_TOKEN};
use super::session::SessionStore;
use super::token::{self, DecodedIdentity};

/// How often the expiry watch checks the access token.
pub const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// A refresh is in flight.
    Refreshing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unauthenticated => write!(f, "unauthenticated"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Refreshing => write!(f, "refreshing"),
        }
    }
}

/// Outcome of one refresh attempt, shared by every caller that joined it.
pub type RefreshOutcome = Result<AuthTokens, Arc<ApiError>>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

pub struct SessionManager {
    session: SessionStore,
    service: AuthService,
    navigator: Arc<dyn Navigator>,
    state: Arc<watch::Sender<SessionState>>,
    in_flight: Mutex<Option<SharedRefresh>>,
}

impl SessionManager {
    pub fn new(session: SessionStore, service: AuthService, navigator: Arc<dyn Navigator>) -> Self {
        let initial = if session.is_live() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        let (state, _) = watch::channel(initial);

        Self {
            session,
            service,
            navigator,
            state: Arc::new(state),
            in_flight: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn service(&self) -> &AuthService {
        &self.service
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    // ===== Token queries =====

    pub fn set_session(&self, tokens: &AuthTokens) -> Result<(), ApiError> {
        self.session.set_session(tokens)
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.access_token()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.session.refresh_token()
    }

    pub fn clear_session(&self) -> Result<(), ApiError> {
        self.session.clear_session()
    }

    pub fn is_expired(&self, token: &str) -> bool {
        self.session.is_expired(token)
    }

    pub fn current_identity(&self) -> Option<DecodedIdentity> {
        self.session.current_identity()
    }

    pub fn is_live(&self) -> bool {
        self.session.is_live()
    }

    // ===== Backend operations =====

    /// Log in and persist the returned session
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let response = self.service.login(email, password).await?;
        self.session.set_session(&response.tokens)?;
        self.transition(SessionState::Authenticated);
        info!(user_id = %response.user.id, "Logged in");
        Ok(response)
    }

    /// Register and persist the returned session
    pub async fn register(&self, fields: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        let response = self.service.register(fields).await?;
        self.session.set_session(&response.tokens)?;
        self.transition(SessionState::Authenticated);
        info!(user_id = %response.user.id, "Registered");
        Ok(response)
    }

    /// Request a new token pair for the persisted refresh token.
    ///
    /// This neither stores the result nor coordinates with other callers;
    /// see `refresh_shared` for that.
    pub async fn refresh(&self) -> Result<AuthTokens, ApiError> {
        let refresh_token = self
            .session
            .refresh_token()
            .ok_or_else(|| ApiError::AuthFailure(NO_REFRESH_TOKEN.to_string()))?;
        self.service.refresh(&refresh_token).await
    }

    /// Perform or join the single in-flight refresh.
    ///
    /// On success the new tokens are persisted. On failure the session is
    /// cleared and the navigator is sent to the login page before the
    /// error is returned to every waiter.
    pub async fn refresh_shared(&self) -> RefreshOutcome {
        let attempt = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight refresh");
                    existing.clone()
                }
                None => {
                    let attempt = self.start_refresh();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        let outcome = attempt.clone().await;

        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&attempt)) {
            *slot = None;
        }
        outcome
    }

    fn start_refresh(&self) -> SharedRefresh {
        let session = self.session.clone();
        let service = self.service.clone();
        let navigator = Arc::clone(&self.navigator);
        let state = Arc::clone(&self.state);

        async move {
            state.send_replace(SessionState::Refreshing);
            debug!("Refreshing session");

            let result = match session.refresh_token() {
                Some(refresh_token) => service.refresh(&refresh_token).await,
                None => Err(ApiError::AuthFailure(NO_REFRESH_TOKEN.to_string())),
            };
            let result = result.and_then(|tokens| session.set_session(&tokens).map(|_| tokens));

            match result {
                Ok(tokens) => {
                    state.send_replace(SessionState::Authenticated);
                    info!("Session refreshed");
                    Ok(tokens)
                }
                Err(e) => {
                    warn!(error = %e, "Session refresh failed, clearing session");
                    if let Err(clear_err) = session.clear_session() {
                        warn!(error = %clear_err, "Failed to clear session");
                    }
                    state.send_replace(SessionState::Unauthenticated);
                    navigator.redirect(LOGIN_PATH);
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Notify the backend best-effort, then clear the local session.
    /// Only a local storage failure is reported.
    pub async fn logout(&self) -> Result<(), ApiError> {
        if let Some(refresh_token) = self.session.refresh_token() {
            if let Err(e) = self.service.logout(&refresh_token).await {
                warn!(error = %e, "Logout API call failed");
            }
        }
        let cleared = self.session.clear_session();
        self.transition(SessionState::Unauthenticated);
        info!("Logged out");
        cleared
    }

    /// Restore state from the persisted tokens at startup, refreshing when
    /// only the refresh token is still usable.
    pub async fn initialize(&self) -> SessionState {
        if self.session.current_identity().is_some() {
            self.transition(SessionState::Authenticated);
        } else if self.session.refresh_token().is_some() {
            if let Err(e) = self.refresh_shared().await {
                debug!(error = %e, "Startup refresh failed");
            }
        } else {
            if self.session.access_token().is_some() {
                // Expired or malformed with nothing to refresh it
                if let Err(e) = self.session.clear_session() {
                    warn!(error = %e, "Failed to clear stale session");
                }
            }
            self.transition(SessionState::Unauthenticated);
        }
        self.state()
    }

    /// Periodically refresh once the access token has expired. The task
    /// ends when the session becomes unauthenticated.
    pub fn spawn_expiry_watch(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                if manager.state() == SessionState::Unauthenticated {
                    debug!("Session ended, stopping expiry watch");
                    break;
                }
                let Some(access_token) = manager.session.access_token() else {
                    continue;
                };
                if token::is_expired(&access_token) {
                    debug!("Access token expired, refreshing");
                    if manager.refresh_shared().await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Session state changed");
        }
    }
}
