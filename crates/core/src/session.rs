//! Session model and credential material

use serde::{Deserialize, Serialize};
use std::fmt;

/// How credentials travel with requests.
///
/// Chosen once at configuration time; the two modes never run side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    /// Explicit access/refresh tokens, persisted and sent as a bearer header
    #[default]
    Token,
    /// Transport-managed http-only cookies; only an "authenticated" flag is tracked
    Cookie,
}

impl fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Cookie => write!(f, "cookie"),
        }
    }
}

/// Tokens returned by the authentication endpoints
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl AuthTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

// Token values stay out of logs.
impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// The client's current belief about authentication
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub is_authenticated: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Session {
    /// An unauthenticated session carrying no credential material
    pub fn cleared() -> Self {
        Self::default()
    }

    /// Authenticated session for token mode
    pub fn with_tokens(tokens: AuthTokens) -> Self {
        Self {
            is_authenticated: true,
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token,
        }
    }

    /// Authenticated session for cookie mode (credentials live in the cookie jar)
    pub fn cookie_authenticated() -> Self {
        Self {
            is_authenticated: true,
            access_token: None,
            refresh_token: None,
        }
    }

    /// Access token to attach, only while authenticated
    pub fn bearer(&self) -> Option<&str> {
        if self.is_authenticated {
            self.access_token.as_deref()
        } else {
            None
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("is_authenticated", &self.is_authenticated)
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_requires_authentication() {
        let mut session = Session::with_tokens(AuthTokens::new("abc", None));
        assert_eq!(session.bearer(), Some("abc"));

        session.is_authenticated = false;
        assert_eq!(session.bearer(), None);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let tokens = AuthTokens::new("secret-access", Some("secret-refresh".into()));
        let rendered = format!("{tokens:?} {:?}", Session::with_tokens(tokens.clone()));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_auth_tokens_without_refresh_token() {
        let tokens: AuthTokens = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(tokens.access_token, "a");
        assert!(tokens.refresh_token.is_none());
    }

    #[test]
    fn test_credential_mode_serde() {
        let mode: CredentialMode = serde_json::from_str("\"cookie\"").unwrap();
        assert_eq!(mode, CredentialMode::Cookie);
        assert_eq!(CredentialMode::Token.to_string(), "token");
    }
}
