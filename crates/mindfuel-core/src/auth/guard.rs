//! Route guards for the app's pages.
//!
//! Each guard maps the current session to a `RouteDecision`. Only the
//! refresh-failure redirect is performed by the session manager itself;
//! guards leave navigation to the caller.

use crate::navigation::{DASHBOARD_PATH, LOGIN_PATH, ONBOARDING_PATH};

use super::manager::SessionState;
use super::token::DecodedIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Render,
    /// Session state is still settling; show a spinner.
    Pending,
    Redirect(&'static str),
}

/// Pages that require a signed-in user.
pub fn protected_route(state: SessionState, identity: Option<&DecodedIdentity>) -> RouteDecision {
    match (state, identity) {
        (SessionState::Refreshing, _) => RouteDecision::Pending,
        (_, Some(_)) => RouteDecision::Render,
        (_, None) => RouteDecision::Redirect(LOGIN_PATH),
    }
}

/// Login and registration pages: signed-in users are sent on to
/// `redirect_to`, usually the dashboard.
pub fn public_route(
    state: SessionState,
    identity: Option<&DecodedIdentity>,
    redirect_to: &'static str,
) -> RouteDecision {
    match (state, identity) {
        (SessionState::Refreshing, _) => RouteDecision::Pending,
        (_, Some(_)) => RouteDecision::Redirect(redirect_to),
        (_, None) => RouteDecision::Render,
    }
}

pub fn public_route_default(
    state: SessionState,
    identity: Option<&DecodedIdentity>,
) -> RouteDecision {
    public_route(state, identity, DASHBOARD_PATH)
}

/// Dashboard gate. An absent onboarding claim counts as incomplete.
pub fn onboarding_gate(state: SessionState, identity: Option<&DecodedIdentity>) -> RouteDecision {
    match (state, identity) {
        (SessionState::Refreshing, _) => RouteDecision::Pending,
        (_, Some(identity)) if identity.needs_onboarding() => {
            RouteDecision::Redirect(ONBOARDING_PATH)
        }
        _ => RouteDecision::Render,
    }
}

/// Protected route followed by the onboarding gate.
pub fn dashboard_route(state: SessionState, identity: Option<&DecodedIdentity>) -> RouteDecision {
    match protected_route(state, identity) {
        RouteDecision::Render => onboarding_gate(state, identity),
        other => other,
    }
}
