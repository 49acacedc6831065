//! Session store: the single owner of authentication state
//!
//! Reads are synchronous. Every mutation bumps a generation counter and
//! publishes the new [`Session`] to subscribers. Replacing the session
//! wholesale (clear, login, load) also bumps the epoch, which lets an
//! in-flight refresh detect that the session it was renewing is gone. Only
//! the refresh path renews within an epoch.

use crate::error::{CoreError, CoreResult};
use crate::session::{AuthTokens, CredentialMode, Session};
use crate::storage::{ACCESS_TOKEN_KEY, KeyValueStore, REFRESH_TOKEN_KEY};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::debug;

/// Session together with the counters it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session: Session,
    pub generation: u64,
    pub epoch: u64,
}

#[derive(Debug, Default)]
struct Inner {
    session: Session,
    generation: u64,
    epoch: u64,
}

/// Holds the current session and its durable copy
pub struct SessionStore {
    mode: CredentialMode,
    storage: Arc<dyn KeyValueStore>,
    inner: RwLock<Inner>,
    notifier: watch::Sender<Session>,
}

impl SessionStore {
    /// Create a store that starts unauthenticated
    pub fn new(mode: CredentialMode, storage: Arc<dyn KeyValueStore>) -> Self {
        let (notifier, _) = watch::channel(Session::cleared());
        Self {
            mode,
            storage,
            inner: RwLock::new(Inner::default()),
            notifier,
        }
    }

    pub fn mode(&self) -> CredentialMode {
        self.mode
    }

    /// Current session snapshot
    pub fn state(&self) -> Session {
        self.read().session.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().session.is_authenticated
    }

    /// Counter bumped by every mutation
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Counter bumped whenever the session is replaced rather than renewed
    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Session and counters read under one lock
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.read();
        SessionSnapshot {
            session: inner.session.clone(),
            generation: inner.generation,
            epoch: inner.epoch,
        }
    }

    /// Receive every future session value
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.notifier.subscribe()
    }

    /// Install a new session, as after a login.
    ///
    /// Token mode requires `tokens`; a missing refresh token keeps the one
    /// already held. Cookie mode only flips the flag. Starts a new epoch, so a
    /// refresh that was renewing the previous session can no longer touch
    /// this one. The in-memory session is updated even when the durable write
    /// fails; the error is returned so the caller can decide how loudly to
    /// complain.
    pub fn set_authenticated(&self, tokens: Option<AuthTokens>) -> CoreResult<Session> {
        let mut inner = self.write();
        inner.epoch += 1;
        self.apply(&mut inner, tokens)
    }

    /// Renew the session within `epoch`, as after a refresh. Returns
    /// `Ok(None)` when the session was cleared or replaced in between and the
    /// tokens were discarded.
    pub fn set_authenticated_if_epoch(
        &self,
        epoch: u64,
        tokens: Option<AuthTokens>,
    ) -> CoreResult<Option<Session>> {
        let mut inner = self.write();
        if inner.epoch != epoch {
            debug!(
                expected = epoch,
                current = inner.epoch,
                "Session was replaced, discarding credentials"
            );
            return Ok(None);
        }
        self.apply(&mut inner, tokens).map(Some)
    }

    /// Forget the session and erase durable credentials. Safe to repeat.
    pub fn clear(&self) -> CoreResult<()> {
        let mut inner = self.write();
        self.clear_locked(&mut inner)
    }

    /// Clear only while the store is still in `epoch`; returns whether it did.
    /// A failing refresh uses this so it never tears down a session created by
    /// a login or clear that completed while the refresh was pending.
    pub fn clear_if_epoch(&self, epoch: u64) -> CoreResult<bool> {
        let mut inner = self.write();
        if inner.epoch != epoch {
            return Ok(false);
        }
        self.clear_locked(&mut inner)?;
        Ok(true)
    }

    fn clear_locked(&self, inner: &mut Inner) -> CoreResult<()> {
        inner.session = Session::cleared();
        inner.generation += 1;
        inner.epoch += 1;
        self.notifier.send_replace(inner.session.clone());

        debug!(epoch = inner.epoch, "Session cleared");
        if self.mode == CredentialMode::Token {
            // Both keys are attempted even if the first removal fails
            let access = self.storage.remove(ACCESS_TOKEN_KEY);
            let refresh = self.storage.remove(REFRESH_TOKEN_KEY);
            access.and(refresh)?;
        }
        Ok(())
    }

    /// Seed the in-memory session from durable storage (token mode).
    ///
    /// Without a stored access token the session starts unauthenticated.
    /// Cookie mode persists nothing, so the current state is returned as is.
    pub fn load_from_storage(&self) -> CoreResult<Session> {
        if self.mode == CredentialMode::Cookie {
            return Ok(self.state());
        }

        let access = self.storage.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.storage.get(REFRESH_TOKEN_KEY)?;

        let mut inner = self.write();
        inner.session = match access {
            Some(access) => Session::with_tokens(AuthTokens::new(access, refresh)),
            None => Session::cleared(),
        };
        inner.generation += 1;
        inner.epoch += 1;
        self.notifier.send_replace(inner.session.clone());
        debug!(
            authenticated = inner.session.is_authenticated,
            "Loaded session from storage"
        );
        Ok(inner.session.clone())
    }

    fn apply(&self, inner: &mut Inner, tokens: Option<AuthTokens>) -> CoreResult<Session> {
        let session = match self.mode {
            CredentialMode::Token => {
                let mut tokens = tokens.ok_or_else(|| {
                    CoreError::internal_error("token mode requires credentials to authenticate")
                })?;
                if tokens.refresh_token.is_none() {
                    tokens.refresh_token = inner.session.refresh_token.clone();
                }
                Session::with_tokens(tokens)
            }
            CredentialMode::Cookie => Session::cookie_authenticated(),
        };

        inner.session = session.clone();
        inner.generation += 1;
        self.notifier.send_replace(session.clone());

        if let (Some(access), CredentialMode::Token) = (&session.access_token, self.mode) {
            let written = self.storage.set(ACCESS_TOKEN_KEY, access);
            let paired = match &session.refresh_token {
                Some(refresh) => self.storage.set(REFRESH_TOKEN_KEY, refresh),
                None => self.storage.remove(REFRESH_TOKEN_KEY),
            };
            written.and(paired)?;
        }
        Ok(session)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("mode", &self.mode)
            .field("session", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, MockKeyValueStore};

    fn token_store() -> (SessionStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (SessionStore::new(CredentialMode::Token, storage.clone()), storage)
    }

    #[test]
    fn test_token_mode_persists_credentials() {
        let (store, storage) = token_store();
        store
            .set_authenticated(Some(AuthTokens::new("access", Some("refresh".into()))))
            .unwrap();

        let session = store.state();
        assert!(session.is_authenticated);
        assert_eq!(session.access_token.as_deref(), Some("access"));
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("access"));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("refresh"));
    }

    #[test]
    fn test_token_mode_requires_credentials() {
        let (store, _) = token_store();
        assert!(store.set_authenticated(None).is_err());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_missing_refresh_token_keeps_previous() {
        let (store, storage) = token_store();
        store
            .set_authenticated(Some(AuthTokens::new("a1", Some("r1".into()))))
            .unwrap();
        store
            .set_authenticated(Some(AuthTokens::new("a2", None)))
            .unwrap();

        assert_eq!(store.state().refresh_token.as_deref(), Some("r1"));
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a2"));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (store, storage) = token_store();
        store
            .set_authenticated(Some(AuthTokens::new("access", Some("refresh".into()))))
            .unwrap();

        store.clear().unwrap();
        let once = store.state();
        store.clear().unwrap();

        assert_eq!(store.state(), once);
        assert_eq!(once, Session::cleared());
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_load_from_storage() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(ACCESS_TOKEN_KEY, "persisted").unwrap();
        storage.set(REFRESH_TOKEN_KEY, "persisted-refresh").unwrap();

        let store = SessionStore::new(CredentialMode::Token, storage);
        let session = store.load_from_storage().unwrap();
        assert!(session.is_authenticated);
        assert_eq!(session.bearer(), Some("persisted"));
        assert_eq!(session.refresh_token.as_deref(), Some("persisted-refresh"));
    }

    #[test]
    fn test_load_from_empty_storage_is_unauthenticated() {
        let (store, _) = token_store();
        let session = store.load_from_storage().unwrap();
        assert_eq!(session, Session::cleared());
    }

    #[test]
    fn test_cookie_mode_tracks_flag_only() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(CredentialMode::Cookie, storage.clone());

        let session = store
            .set_authenticated(Some(AuthTokens::new("ignored", None)))
            .unwrap();
        assert!(session.is_authenticated);
        assert!(session.access_token.is_none());
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);

        // Nothing application-visible is persisted, so loading changes nothing
        assert!(store.load_from_storage().unwrap().is_authenticated);
    }

    #[test]
    fn test_epoch_guard_discards_after_clear() {
        let (store, storage) = token_store();
        store
            .set_authenticated(Some(AuthTokens::new("old", Some("r".into()))))
            .unwrap();

        let epoch = store.epoch();
        store.clear().unwrap();

        let applied = store
            .set_authenticated_if_epoch(epoch, Some(AuthTokens::new("new", None)))
            .unwrap();
        assert!(applied.is_none());
        assert!(!store.is_authenticated());
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);

        let applied = store
            .set_authenticated_if_epoch(store.epoch(), Some(AuthTokens::new("new", None)))
            .unwrap();
        assert!(applied.is_some());
        assert_eq!(store.state().bearer(), Some("new"));
    }

    #[test]
    fn test_clear_if_epoch_spares_newer_session() {
        let (store, _) = token_store();
        let stale_epoch = store.epoch();
        store.clear().unwrap();
        store
            .set_authenticated(Some(AuthTokens::new("fresh-login", None)))
            .unwrap();

        assert!(!store.clear_if_epoch(stale_epoch).unwrap());
        assert!(store.is_authenticated());
        assert!(store.clear_if_epoch(store.epoch()).unwrap());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_snapshot_is_consistent() {
        let (store, _) = token_store();
        store
            .set_authenticated(Some(AuthTokens::new("a", None)))
            .unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.session, store.state());
        assert_eq!(snapshot.generation, store.generation());
        assert_eq!(snapshot.epoch, store.epoch());
    }

    #[test]
    fn test_generation_advances_on_every_mutation() {
        let (store, _) = token_store();
        let start = store.generation();
        store
            .set_authenticated(Some(AuthTokens::new("a", None)))
            .unwrap();
        store.clear().unwrap();
        assert_eq!(store.generation(), start + 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let (store, _) = token_store();
        let mut rx = store.subscribe();

        store
            .set_authenticated(Some(AuthTokens::new("a", None)))
            .unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated);

        store.clear().unwrap();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_authenticated);
    }

    /// Memory storage whose access-token key cannot be written or removed
    #[derive(Default)]
    struct StuckAccessKey {
        inner: MemoryStorage,
    }

    impl KeyValueStore for StuckAccessKey {
        fn get(&self, key: &str) -> CoreResult<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> CoreResult<()> {
            if key == ACCESS_TOKEN_KEY && value != "seed" {
                return Err(CoreError::storage("disk full"));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> CoreResult<()> {
            if key == ACCESS_TOKEN_KEY {
                return Err(CoreError::storage("read-only"));
            }
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_storage_failure_keeps_in_memory_session() {
        let mut storage = MockKeyValueStore::new();
        storage
            .expect_set()
            .returning(|_, _| Err(CoreError::storage("disk full")));
        storage.expect_remove().times(1).returning(|_| Ok(()));

        let store = SessionStore::new(CredentialMode::Token, Arc::new(storage));
        let result = store.set_authenticated(Some(AuthTokens::new("access", None)));

        assert!(matches!(result, Err(CoreError::Storage { .. })));
        assert_eq!(store.state().bearer(), Some("access"));
    }

    #[test]
    fn test_failed_access_write_still_writes_refresh_token() {
        let storage = Arc::new(StuckAccessKey::default());
        let store = SessionStore::new(CredentialMode::Token, storage.clone());

        let result = store.set_authenticated(Some(AuthTokens::new("a2", Some("r2".into()))));

        assert!(matches!(result, Err(CoreError::Storage { .. })));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r2"));
    }

    #[test]
    fn test_clear_propagates_storage_failure() {
        let mut storage = MockKeyValueStore::new();
        storage
            .expect_remove()
            .times(2)
            .returning(|_| Err(CoreError::storage("read-only")));

        let store = SessionStore::new(CredentialMode::Token, Arc::new(storage));
        assert!(store.clear().is_err());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_clear_erases_refresh_token_when_access_removal_fails() {
        let storage = Arc::new(StuckAccessKey::default());
        storage.set(ACCESS_TOKEN_KEY, "seed").unwrap();
        storage.set(REFRESH_TOKEN_KEY, "r").unwrap();
        let store = SessionStore::new(CredentialMode::Token, storage.clone());
        store.load_from_storage().unwrap();

        let result = store.clear();

        assert!(matches!(result, Err(CoreError::Storage { .. })));
        assert!(!store.is_authenticated());
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_login_starts_new_epoch() {
        let (store, _) = token_store();
        store
            .set_authenticated(Some(AuthTokens::new("a1", Some("r1".into()))))
            .unwrap();
        let refresh_epoch = store.epoch();

        store
            .set_authenticated(Some(AuthTokens::new("a3", Some("r3".into()))))
            .unwrap();

        assert!(!store.clear_if_epoch(refresh_epoch).unwrap());
        let applied = store
            .set_authenticated_if_epoch(refresh_epoch, Some(AuthTokens::new("a2", None)))
            .unwrap();
        assert!(applied.is_none());
        assert_eq!(store.state().bearer(), Some("a3"));
        assert_eq!(store.state().refresh_token.as_deref(), Some("r3"));
    }

    #[test]
    fn test_refresh_renews_within_epoch() {
        let (store, _) = token_store();
        store
            .set_authenticated(Some(AuthTokens::new("a1", Some("r1".into()))))
            .unwrap();
        let epoch = store.epoch();

        store
            .set_authenticated_if_epoch(epoch, Some(AuthTokens::new("a2", None)))
            .unwrap();
        assert_eq!(store.epoch(), epoch);
        assert_eq!(store.state().bearer(), Some("a2"));
    }
}
