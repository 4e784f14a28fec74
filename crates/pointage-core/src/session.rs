//! Session context and screen guard.
//!
//! A [`Session`] is created by a successful login, persisted in the
//! [`StateStore`], and destroyed by [`logout`]. Protected screens resolve it
//! through [`require_session`] before rendering anything, and [`route`] picks
//! the screen that should actually be displayed.

use serde::{Deserialize, Serialize};

use crate::error::{PointageError, Result};
use crate::storage::StateStore;
use crate::types::{PointageType, Screen};

/// Logged-in operator context passed to every protected screen.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token for the remote API.
    pub token: String,
    /// Pointage type applied to the next clockings.
    pub pointage_type: PointageType,
}

impl Session {
    /// Create a session context.
    #[must_use]
    pub fn new(token: impl Into<String>, pointage_type: PointageType) -> Self {
        Self {
            token: token.into(),
            pointage_type,
        }
    }

    /// Whether a usable token is present.
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

// Never print the token.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("pointage_type", &self.pointage_type)
            .finish()
    }
}

/// Return the stored session, or [`PointageError::NoSession`].
///
/// A stored session with a blank token counts as no session.
///
/// # Errors
///
/// Returns [`PointageError::NoSession`] when the caller must redirect to login.
pub fn require_session(store: &StateStore) -> Result<Session> {
    match store.session() {
        Some(session) if session.has_token() => Ok(session.clone()),
        _ => {
            tracing::debug!("no session stored, redirecting to login");
            Err(PointageError::NoSession)
        }
    }
}

/// Resolve the screen to display for a navigation request.
///
/// Protected screens without a session go to [`Screen::Login`]; the login
/// screen with a session goes to [`Screen::Dashboard`].
#[must_use]
pub fn route(store: &StateStore, requested: Screen) -> Screen {
    let logged_in = require_session(store).is_ok();
    match requested {
        Screen::Login if logged_in => Screen::Dashboard,
        screen if screen.is_protected() && !logged_in => Screen::Login,
        screen => screen,
    }
}

/// Clear all persisted state and return the login screen.
///
/// Always redirects, even if the state file could not be removed.
pub fn logout(store: &mut StateStore) -> Screen {
    if let Err(e) = store.clear() {
        tracing::warn!(error = %e, "failed to clear persisted state on logout");
    } else {
        tracing::info!("logged out");
    }
    Screen::Login
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_with(session: Option<Session>) -> (tempfile::TempDir, StateStore) {
        let dir = tempdir().unwrap();
        let mut store = StateStore::in_dir(dir.path()).unwrap();
        if let Some(session) = session {
            store.set_session(session).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn test_require_session_without_token() {
        let (_dir, store) = store_with(None);
        let err = require_session(&store).unwrap_err();
        assert!(err.redirects_to_login());
    }

    #[test]
    fn test_blank_token_is_no_session() {
        let (_dir, store) = store_with(Some(Session::new("  ", PointageType::Entry)));
        assert!(require_session(&store).is_err());
    }

    #[test]
    fn test_require_session_returns_context() {
        let (_dir, store) = store_with(Some(Session::new("abc", PointageType::Exit)));
        let session = require_session(&store).unwrap();
        assert_eq!(session.token, "abc");
        assert_eq!(session.pointage_type, PointageType::Exit);
    }

    #[test]
    fn test_every_protected_screen_redirects_without_session() {
        let (_dir, store) = store_with(None);
        for screen in [Screen::Dashboard, Screen::Scan, Screen::History] {
            assert_eq!(route(&store, screen), Screen::Login);
        }
        assert_eq!(route(&store, Screen::Login), Screen::Login);
    }

    #[test]
    fn test_login_redirects_to_dashboard_with_session() {
        let (_dir, store) = store_with(Some(Session::new("abc", PointageType::Entry)));
        assert_eq!(route(&store, Screen::Login), Screen::Dashboard);
        assert_eq!(route(&store, Screen::Scan), Screen::Scan);
    }

    #[test]
    fn test_logout_clears_and_redirects() {
        let (_dir, mut store) = store_with(Some(Session::new("abc", PointageType::Entry)));
        assert_eq!(logout(&mut store), Screen::Login);
        assert!(store.session().is_none());
        assert_eq!(route(&store, Screen::Dashboard), Screen::Login);
        // logging out twice still lands on login
        assert_eq!(logout(&mut store), Screen::Login);
    }

    #[test]
    fn test_debug_redacts_token() {
        let session = Session::new("secret-token", PointageType::Entry);
        let printed = format!("{session:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("redacted"));
    }
}
