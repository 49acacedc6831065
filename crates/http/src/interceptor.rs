//! Request interceptor
//!
//! Every request sent through a [`SessionClient`](crate::SessionClient) goes
//! through [`Interceptor::execute`]:
//!
//! 1. A request that already carries an `Authorization` header is sent as is.
//! 2. Otherwise the credential strategy attaches the current credentials.
//! 3. A `401` is recovered through the [`RefreshCoordinator`] and the request
//!    is replayed once. A second `401` is surfaced as
//!    [`ClientError::SessionExpired`].
//! 4. Any other response is returned untouched.

use crate::client::error::{ClientError, RefreshError};
use crate::coordinator::RefreshCoordinator;
use crate::credentials::CredentialStrategy;
use crate::transport::Transport;
use reqwest::header::AUTHORIZATION;
use reqwest::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};
use turnstile_core::{SessionSnapshot, SessionStore};

pub struct Interceptor {
    transport: Arc<dyn Transport>,
    store: Arc<SessionStore>,
    strategy: Arc<dyn CredentialStrategy>,
    coordinator: Arc<RefreshCoordinator>,
}

impl Interceptor {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<SessionStore>,
        strategy: Arc<dyn CredentialStrategy>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            transport,
            store,
            strategy,
            coordinator,
        }
    }

    /// Send `request` with session credentials, recovering from one `401`
    pub async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        if request.headers().contains_key(AUTHORIZATION) {
            debug!(url = %request.url(), "Request carries its own credentials");
            return Ok(self.transport.send(request).await?);
        }

        let replay = request.try_clone();
        let (response, sent_with) = self.send(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(replay) = replay else {
            debug!(url = %response.url(), "Unauthorized response to a streaming request, not replayable");
            return Ok(response);
        };

        self.recover(&sent_with).await?;

        debug!(url = %replay.url(), "Replaying request with renewed credentials");
        let (response, _) = self.send(replay).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %response.url(), "Still unauthorized after refresh");
            return Err(ClientError::SessionExpired);
        }
        Ok(response)
    }

    async fn send(&self, mut request: Request) -> Result<(Response, SessionSnapshot), ClientError> {
        let snapshot = self.store.snapshot();
        self.strategy.attach(&mut request, &snapshot.session);
        let response = self.transport.send(request).await?;
        Ok((response, snapshot))
    }

    /// Make sure the session is newer than the one the request was sent with
    async fn recover(&self, sent_with: &SessionSnapshot) -> Result<(), RefreshError> {
        let current = self.store.snapshot();
        if current.generation != sent_with.generation && current.session.is_authenticated {
            debug!(
                sent = sent_with.generation,
                current = current.generation,
                "Session changed while the request was in flight"
            );
            return Ok(());
        }
        if current.epoch != sent_with.epoch {
            return Err(RefreshError::SessionCleared);
        }
        self.coordinator.refresh().await.map(|_| ())
    }
}
