//! Turnstile HTTP session client
//!
//! Attaches credentials to outgoing requests, recovers from expired sessions
//! with a single coordinated refresh, and replays the requests that failed.

pub mod client;
pub mod coordinator;
pub mod credentials;
pub mod interceptor;
pub mod transport;
pub mod types;

pub use client::auth::AuthClient;
pub use client::error::{ClientError, RefreshError};
pub use client::{SessionClient, SessionClientBuilder};
pub use coordinator::{RefreshCoordinator, RefreshState, SessionRefresher};
pub use credentials::{CookieCredentials, CredentialStrategy, TokenCredentials};
pub use interceptor::Interceptor;
pub use transport::Transport;
pub use types::{AuthTokens, ErrorBody, RegisterRequest};

// Re-export commonly used types
pub use turnstile_core::{CredentialMode, Navigation, RouteGuard, Session};
