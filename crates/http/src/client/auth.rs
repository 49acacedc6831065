//! Authentication API client methods

use super::ClientError;
use crate::client::error::RefreshError;
use crate::coordinator::SessionRefresher;
use crate::credentials::CredentialStrategy;
use crate::transport::Transport;
use crate::types::{AuthTokens, ErrorBody, RegisterRequest};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Request, StatusCode};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use turnstile_core::{CoreResult, CredentialMode, Session, SessionStore};

pub const AUTHENTICATE_PATH: &str = "/auth/authenticate";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh-token";
pub const LOGOUT_PATH: &str = "/auth/logout";

const LOGIN_FALLBACK: &str = "Error during login";
const REGISTER_FALLBACK: &str = "Error during registration";

/// Round trips against the `/auth` endpoints.
///
/// Requests go straight to the transport: the refresh exchange must never be
/// intercepted, or a failing refresh would wait on itself.
pub struct AuthClient {
    transport: Arc<dyn Transport>,
    requests: reqwest::Client,
    store: Arc<SessionStore>,
    strategy: Arc<dyn CredentialStrategy>,
    base_url: String,
}

impl AuthClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        requests: reqwest::Client,
        store: Arc<SessionStore>,
        strategy: Arc<dyn CredentialStrategy>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            requests,
            store,
            strategy,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post(&self, path: &str, session: &Session) -> Result<Request, reqwest::Error> {
        let mut request = self
            .requests
            .request(Method::POST, self.url(path))
            .json(&serde_json::json!({}))
            .build()?;
        self.strategy.attach(&mut request, session);
        Ok(request)
    }

    /// Authenticate with username and password.
    ///
    /// On rejection the session is left exactly as it was.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ClientError> {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        let mut request = self
            .requests
            .request(Method::POST, self.url(AUTHENTICATE_PATH))
            .header(AUTHORIZATION, format!("Basic {encoded}"))
            .json(&serde_json::json!({}))
            .build()?;
        self.strategy.attach(&mut request, &self.store.state());

        let response = self.transport.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Login rejected");
            return Err(ClientError::CredentialsRejected(ErrorBody::message_or(
                &body,
                LOGIN_FALLBACK,
            )));
        }

        let tokens = match self.strategy.mode() {
            CredentialMode::Token => Some(response.json::<AuthTokens>().await?),
            CredentialMode::Cookie => None,
        };
        let session = self.persisted(self.store.set_authenticated(tokens));
        info!(mode = %self.strategy.mode(), "Logged in");
        Ok(session)
    }

    /// Create an account. Does not touch the session.
    pub async fn register(&self, profile: &RegisterRequest) -> Result<serde_json::Value, ClientError> {
        let mut request = self
            .requests
            .request(Method::POST, self.url(REGISTER_PATH))
            .json(profile)
            .build()?;
        self.strategy.attach(&mut request, &self.store.state());

        let response = self.transport.send(request).await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Registration rejected");
            return Err(ClientError::RegistrationFailed(ErrorBody::message_or(
                &body,
                REGISTER_FALLBACK,
            )));
        }

        info!(email = %profile.email, "Registered");
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body)))
    }

    /// One refresh round trip, without coordination.
    ///
    /// The outcome only applies to the session the refresh started from.
    /// Success installs the new credentials and failure clears that session,
    /// never retried. When a login or logout replaced the session in the
    /// meantime, the replacement is kept and reported instead.
    pub async fn refresh_session(&self) -> Result<Session, RefreshError> {
        let started = self.store.snapshot();

        match self.exchange_refresh(&started.session).await {
            Ok(tokens) => match self.store.set_authenticated_if_epoch(started.epoch, tokens) {
                Ok(Some(session)) => Ok(session),
                Ok(None) => self.replacement(),
                Err(e) => {
                    warn!(error = %e, "Failed to persist refreshed credentials");
                    Ok(self.store.state())
                }
            },
            Err(e) => match self.store.clear_if_epoch(started.epoch) {
                Ok(true) => {
                    debug!("Cleared session after failed refresh");
                    Err(e)
                }
                Ok(false) => self.replacement().map_err(|_| e),
                Err(err) => {
                    warn!(error = %err, "Failed to erase stored credentials");
                    Err(e)
                }
            },
        }
    }

    /// Session that superseded the one a refresh was renewing
    fn replacement(&self) -> Result<Session, RefreshError> {
        let session = self.store.state();
        if session.is_authenticated {
            debug!("Session replaced by a login during refresh, keeping it");
            Ok(session)
        } else {
            debug!("Session cleared during refresh");
            Err(RefreshError::SessionCleared)
        }
    }

    async fn exchange_refresh(&self, session: &Session) -> Result<Option<AuthTokens>, RefreshError> {
        let mut request = self
            .requests
            .request(Method::POST, self.url(REFRESH_PATH))
            .json(&serde_json::json!({}))
            .build()
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        self.strategy.attach_refresh(&mut request, session)?;

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(RefreshError::Expired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: ErrorBody::message_or(&body, status.canonical_reason().unwrap_or("")),
            });
        }

        match self.strategy.mode() {
            CredentialMode::Token => response
                .json::<AuthTokens>()
                .await
                .map(Some)
                .map_err(|e| RefreshError::Transport(e.to_string())),
            CredentialMode::Cookie => Ok(None),
        }
    }

    /// Clear the session now, then tell the server in the background.
    ///
    /// The local clear never waits on or depends on the notification. Returns
    /// the notification task when one was started, which only happens for a
    /// session that was authenticated and inside a tokio runtime.
    pub fn logout(&self) -> Option<JoinHandle<()>> {
        let session = self.store.state();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to erase stored credentials");
        }
        info!("Logged out");

        if !session.is_authenticated {
            return None;
        }
        let request = match self.post(LOGOUT_PATH, &session) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Could not build logout notification");
                return None;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, skipping logout notification");
            return None;
        };

        let transport = Arc::clone(&self.transport);
        Some(runtime.spawn(async move {
            match transport.send(request).await {
                Ok(response) if response.status().is_success() => {
                    debug!("Server acknowledged logout");
                }
                Ok(response) => {
                    warn!(status = response.status().as_u16(), "Server did not acknowledge logout");
                }
                Err(e) => warn!(error = %e, "Logout notification failed"),
            }
        }))
    }

    /// Session after a mutation whose durable write may have failed
    fn persisted(&self, result: CoreResult<Session>) -> Session {
        result.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to persist credentials, session kept in memory only");
            self.store.state()
        })
    }
}

#[async_trait]
impl SessionRefresher for AuthClient {
    async fn refresh_session(&self) -> Result<Session, RefreshError> {
        Self::refresh_session(self).await
    }
}

impl fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.base_url)
            .field("mode", &self.strategy.mode())
            .finish_non_exhaustive()
    }
}
