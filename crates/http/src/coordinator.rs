//! Refresh coordinator
//!
//! Guarantees at most one session refresh is running at a time. The first
//! caller to find the coordinator idle starts an episode: the refresh runs in
//! its own task and its outcome is shared with every caller that arrives
//! before it settles. Settlement (success, failure, panic or cancellation)
//! returns the coordinator to idle.

use crate::client::error::RefreshError;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use turnstile_core::Session;

/// Performs the actual refresh round trip
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh_session(&self) -> Result<Session, RefreshError>;
}

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

type Outcome = Shared<BoxFuture<'static, Result<Session, RefreshError>>>;

struct Episode {
    id: u64,
    outcome: Outcome,
}

type Slot = Arc<Mutex<Option<Episode>>>;

fn lock(slot: &Mutex<Option<Episode>>) -> MutexGuard<'_, Option<Episode>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Empties the slot when the refresh task ends, however it ends
struct SlotRelease {
    slot: Slot,
    id: u64,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|episode| episode.id == self.id) {
            *slot = None;
        }
    }
}

/// Single-flight gate in front of a [`SessionRefresher`]
pub struct RefreshCoordinator {
    refresher: Arc<dyn SessionRefresher>,
    slot: Slot,
    episodes: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn SessionRefresher>) -> Self {
        Self {
            refresher,
            slot: Arc::new(Mutex::new(None)),
            episodes: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RefreshState {
        if lock(&self.slot).is_some() {
            RefreshState::Refreshing
        } else {
            RefreshState::Idle
        }
    }

    /// Number of episodes started so far
    pub fn episodes_started(&self) -> u64 {
        self.episodes.load(Ordering::Relaxed)
    }

    /// Join the running episode, or start one.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// future abandons the wait but not the refresh.
    pub async fn refresh(&self) -> Result<Session, RefreshError> {
        let outcome = {
            let mut slot = lock(&self.slot);
            match slot.as_ref() {
                Some(episode) => {
                    debug!(episode = episode.id, "Joining refresh in progress");
                    episode.outcome.clone()
                }
                None => {
                    // Still holding the lock, so the task's release guard
                    // cannot run before the episode is stored.
                    let episode = self.start();
                    let outcome = episode.outcome.clone();
                    *slot = Some(episode);
                    outcome
                }
            }
        };
        outcome.await
    }

    fn start(&self) -> Episode {
        let id = self.episodes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(episode = id, "Starting session refresh");

        let refresher = Arc::clone(&self.refresher);
        let release = SlotRelease {
            slot: Arc::clone(&self.slot),
            id,
        };
        let task = tokio::spawn(async move {
            let _release = release;
            refresher.refresh_session().await
        });

        let outcome = async move {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(episode = id, error = %e, "Refresh task did not complete");
                    Err(RefreshError::Aborted)
                }
            };
            match &outcome {
                Ok(_) => info!(episode = id, "Session refresh succeeded"),
                Err(e) => warn!(episode = id, error = %e, "Session refresh failed"),
            }
            outcome
        }
        .boxed()
        .shared();

        Episode { id, outcome }
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("state", &self.state())
            .field("episodes_started", &self.episodes_started())
            .finish_non_exhaustive()
    }
}
