//! Turnstile session client

pub mod auth;
pub mod error;

use crate::coordinator::{RefreshCoordinator, RefreshState};
use crate::credentials::{CookieCredentials, CredentialStrategy, TokenCredentials};
use crate::interceptor::Interceptor;
use crate::transport::Transport;
use crate::types::RegisterRequest;
use auth::AuthClient;
use error::ClientError;
use reqwest::cookie::Jar;
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use turnstile_core::{
    CredentialMode, KeyValueStore, MemoryStorage, RouteGuard, Session, SessionConfig,
    SessionStore, XsrfConfig,
};

const DEFAULT_USER_AGENT: &str = concat!("turnstile/", env!("CARGO_PKG_VERSION"));

/// Authenticated API client
#[derive(Clone)]
pub struct SessionClient {
    client: Client,
    base_url: String,
    store: Arc<SessionStore>,
    auth: Arc<AuthClient>,
    coordinator: Arc<RefreshCoordinator>,
    interceptor: Arc<Interceptor>,
    cookie_jar: Option<Arc<Jar>>,
}

impl SessionClient {
    /// Create a new client with default configuration
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> SessionClientBuilder {
        SessionClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn mode(&self) -> CredentialMode {
        self.store.mode()
    }

    /// Create a request builder. Credentials are attached when it is sent.
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url)
    }

    /// Send a request through the interceptor
    pub async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ClientError> {
        self.interceptor.execute(request.build()?).await
    }

    /// Execute a request and handle common errors
    pub async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        } else {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            Err(ClientError::from_status(status, message))
        }
    }

    /// The underlying auth endpoint client
    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ClientError> {
        self.auth.login(username, password).await
    }

    pub async fn register(
        &self,
        profile: &RegisterRequest,
    ) -> Result<serde_json::Value, ClientError> {
        self.auth.register(profile).await
    }

    /// See [`AuthClient::logout`]
    pub fn logout(&self) -> Option<JoinHandle<()>> {
        self.auth.logout()
    }

    /// Refresh the session, joining a refresh that is already running
    pub async fn refresh(&self) -> Result<Session, ClientError> {
        Ok(self.coordinator.refresh().await?)
    }

    /// Restore the session at startup.
    ///
    /// Token mode reads the stored credentials. Cookie mode has nothing
    /// readable to restore and tries one silent refresh instead; when that
    /// fails the session simply stays cleared.
    pub async fn resume(&self) -> Result<Session, ClientError> {
        match self.mode() {
            CredentialMode::Token => Ok(self.store.load_from_storage()?),
            CredentialMode::Cookie => match self.coordinator.refresh().await {
                Ok(session) => Ok(session),
                Err(e) => {
                    debug!(error = %e, "No session to resume");
                    Ok(self.store.state())
                }
            },
        }
    }

    /// Current session
    pub fn session(&self) -> Session {
        self.store.state()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Receive every future session value
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.store.subscribe()
    }

    /// Route guard bound to this client's session
    pub fn guard(&self) -> RouteGuard {
        RouteGuard::new(Arc::clone(&self.store))
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn coordinator_state(&self) -> RefreshState {
        self.coordinator.state()
    }

    /// Cookie jar shared with the transport (cookie mode only)
    pub fn cookie_jar(&self) -> Option<&Arc<Jar>> {
        self.cookie_jar.as_ref()
    }
}

/// Builder for SessionClient
#[derive(Default)]
pub struct SessionClientBuilder {
    base_url: Option<String>,
    mode: CredentialMode,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    storage: Option<Arc<dyn KeyValueStore>>,
    xsrf: XsrfConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl SessionClientBuilder {
    /// Start from loaded configuration. Storage is opened by the caller.
    pub fn from_config(config: &SessionConfig) -> Self {
        let mut builder = Self::default()
            .base_url(&config.api_base_url)
            .mode(config.mode)
            .user_agent(&config.user_agent)
            .xsrf(config.xsrf.clone());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        builder
    }

    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the credential mode
    pub fn mode(mut self, mode: CredentialMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Set the durable credential storage (in-memory by default)
    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the anti-forgery cookie and header names
    pub fn xsrf(mut self, xsrf: XsrfConfig) -> Self {
        self.xsrf = xsrf;
        self
    }

    /// Send through a custom transport instead of the built `reqwest::Client`
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<SessionClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        let mut client_builder = ClientBuilder::new();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        client_builder =
            client_builder.user_agent(self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));

        let cookie_jar = match self.mode {
            CredentialMode::Cookie => {
                let jar = Arc::new(Jar::default());
                client_builder = client_builder.cookie_provider(Arc::clone(&jar));
                Some(jar)
            }
            CredentialMode::Token => None,
        };

        let client = client_builder.build()?;

        let strategy: Arc<dyn CredentialStrategy> = match &cookie_jar {
            Some(jar) => Arc::new(
                CookieCredentials::new(Arc::clone(jar), &self.xsrf)
                    .map_err(|e| ClientError::Configuration(format!("xsrf header name: {e}")))?,
            ),
            None => Arc::new(TokenCredentials),
        };

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(client.clone()) as Arc<dyn Transport>);
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn KeyValueStore>);
        let store = Arc::new(SessionStore::new(self.mode, storage));

        let auth = Arc::new(AuthClient::new(
            Arc::clone(&transport),
            client.clone(),
            Arc::clone(&store),
            Arc::clone(&strategy),
            base_url.clone(),
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(auth.clone()));
        let interceptor = Arc::new(Interceptor::new(
            transport,
            Arc::clone(&store),
            strategy,
            Arc::clone(&coordinator),
        ));

        Ok(SessionClient {
            client,
            base_url,
            store,
            auth,
            coordinator,
            interceptor,
            cookie_jar,
        })
    }
}
