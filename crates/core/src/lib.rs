//! Turnstile core: session model, session store and durable credential storage

pub mod config;
pub mod error;
pub mod guard;
pub mod session;
pub mod storage;
pub mod store;

pub use config::{SessionConfig, StorageBackend, StorageConfig, XsrfConfig};
pub use error::{CoreError, CoreResult};
pub use guard::{Navigation, RouteGuard};
pub use session::{AuthTokens, CredentialMode, Session};
pub use storage::{FileStorage, KeyValueStore, MemoryStorage};
pub use store::{SessionSnapshot, SessionStore};
