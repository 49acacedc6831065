//! Client error types

use thiserror::Error;
use turnstile_core::CoreError;

/// Why a session refresh did not produce a new session.
///
/// Cloneable because one outcome is handed to every request that joined the
/// same refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// Token mode has no refresh token to send
    #[error("No refresh credential available")]
    NoRefreshCredential,

    /// The backend answered 409: the refresh credential itself expired
    #[error("Refresh credential expired")]
    Expired,

    /// Any other non-success answer from the refresh endpoint
    #[error("Refresh rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The refresh request never got an answer, or the answer was unreadable
    #[error("Refresh request failed: {0}")]
    Transport(String),

    /// A logout happened while the refresh was in flight
    #[error("Session was cleared while refreshing")]
    SessionCleared,

    /// The refresh task ended without producing an outcome
    #[error("Refresh aborted")]
    Aborted,
}

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Initial authentication was refused
    #[error("{0}")]
    CredentialsRejected(String),

    /// Registration was refused
    #[error("{0}")]
    RegistrationFailed(String),

    /// The session could not be renewed and has been cleared
    #[error("Session refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    /// Still unauthorized after a successful refresh and one replay
    #[error("Session expired")]
    SessionExpired,

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Response body did not decode into the expected type
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Session storage failed
    #[error(transparent)]
    Storage(#[from] CoreError),
}

impl ClientError {
    /// Create error from HTTP status code
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::ServerError {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// The session is gone and the user has to log in again
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::RefreshFailed(_) | Self::SessionExpired | Self::AuthenticationFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ClientError::from_status(StatusCode::NOT_FOUND, "missing".into()),
            ClientError::NotFound(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::CONFLICT, "conflict".into()),
            ClientError::ServerError { status: 409, .. }
        ));
    }

    #[test]
    fn test_auth_expired_classification() {
        assert!(ClientError::SessionExpired.is_auth_expired());
        assert!(ClientError::RefreshFailed(RefreshError::Expired).is_auth_expired());
        assert!(!ClientError::CredentialsRejected("bad password".into()).is_auth_expired());
        assert!(!ClientError::Configuration("x".into()).is_auth_expired());
    }
}
