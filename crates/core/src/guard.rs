//! Route guard consulting the session store
//!
//! Mirrors the application's routing table: the login and registration views
//! are public, the home view requires an authenticated session and bounces to
//! the login view with a `returnUrl` pointing back at it, and any path the
//! table does not know goes to the login view.

use crate::store::SessionStore;
use std::sync::Arc;

/// Path of the login view
pub const LOGIN_PATH: &str = "/login";

/// Views reachable without a session
pub const PUBLIC_PATHS: &[&str] = &[LOGIN_PATH, "/register", "/register-success"];

/// Views that require a session
pub const PROTECTED_PATHS: &[&str] = &["/"];

const RETURN_URL_PARAM: &str = "returnUrl";

/// Outcome of a navigation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Allow,
    Redirect { to: String },
}

/// Allows or denies navigation based on the current session
#[derive(Debug, Clone)]
pub struct RouteGuard {
    store: Arc<SessionStore>,
}

impl RouteGuard {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Decide whether `path` may be shown
    pub fn can_activate(&self, path: &str) -> Navigation {
        let route = normalize(path);
        if PUBLIC_PATHS.contains(&route) {
            return Navigation::Allow;
        }
        if !PROTECTED_PATHS.contains(&route) {
            return Navigation::Redirect {
                to: LOGIN_PATH.to_string(),
            };
        }
        if self.store.is_authenticated() {
            return Navigation::Allow;
        }

        Navigation::Redirect {
            to: format!(
                "{LOGIN_PATH}?{RETURN_URL_PARAM}={}",
                urlencoding::encode(route)
            ),
        }
    }
}

/// Destination after a successful login, taken from the login view's query
/// string and defaulting to the home view
pub fn return_url(query: &str) -> String {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == RETURN_URL_PARAM)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| value.starts_with('/') && !value.starts_with("//"))
        .unwrap_or_else(|| "/".to_string())
}

fn normalize(path: &str) -> &str {
    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    if path.is_empty() { "/" } else { path }
}
