//! Client session configuration
//!
//! Loaded from built-in defaults, then an optional TOML file, then
//! `TURNSTILE_*` environment variables (nested keys separated by `__`, e.g.
//! `TURNSTILE_STORAGE__BACKEND=memory`).

use crate::error::{CoreError, CoreResult};
use crate::session::CredentialMode;
use crate::storage::{FileStorage, KeyValueStore, MemoryStorage};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Name of the session file inside the data directory
pub const SESSION_FILE: &str = "session.json";

const ENV_PREFIX: &str = "TURNSTILE";

/// Session client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Backend API root, auth endpoints live under `/auth`
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Credential handling mode
    #[serde(default)]
    pub mode: CredentialMode,
    /// Request timeout in seconds (0 disables the timeout)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Durable storage settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Anti-forgery cookie and header names (cookie mode)
    #[serde(default)]
    pub xsrf: XsrfConfig,
}

/// Where credentials are persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Session file; defaults to `<data dir>/session.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
}

/// Anti-forgery token names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XsrfConfig {
    #[serde(default = "default_xsrf_cookie")]
    pub cookie_name: String,
    #[serde(default = "default_xsrf_header")]
    pub header_name: String,
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("turnstile/{}", env!("CARGO_PKG_VERSION"))
}

fn default_xsrf_cookie() -> String {
    "XSRF-TOKEN".to_string()
}

fn default_xsrf_header() -> String {
    "X-XSRF-TOKEN".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            mode: CredentialMode::default(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            storage: StorageConfig::default(),
            xsrf: XsrfConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: None,
        }
    }
}

impl Default for XsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_xsrf_cookie(),
            header_name: default_xsrf_header(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from the usual file locations and the environment
    pub fn load() -> CoreResult<Self> {
        let config_paths = ["turnstile.toml", "config/turnstile.toml"];

        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        for path in &config_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path).required(false));
            }
        }

        let config: Self = builder.add_source(env_source()).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, environment still overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path.as_ref()))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the client cannot work with
    pub fn validate(&self) -> CoreResult<()> {
        let url = url::Url::parse(&self.api_base_url).map_err(|e| {
            CoreError::invalid_config(format!("api_base_url '{}': {e}", self.api_base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::invalid_config(format!(
                "api_base_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.xsrf.cookie_name.is_empty() || self.xsrf.header_name.is_empty() {
            return Err(CoreError::invalid_config("xsrf names must not be empty"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Open the configured storage backend, resolving relative defaults
    /// against `data_dir`
    pub fn open_storage(&self, data_dir: &Path) -> CoreResult<Arc<dyn KeyValueStore>> {
        Ok(match self.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
            StorageBackend::File => {
                let path = self
                    .storage
                    .path
                    .clone()
                    .unwrap_or_else(|| data_dir.join(SESSION_FILE));
                Arc::new(FileStorage::open(path)?)
            }
        })
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, CredentialMode::Token);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.xsrf.cookie_name, "XSRF-TOKEN");
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("turnstile.toml");
        std::fs::write(
            &path,
            r#"
api_base_url = "https://api.example.com/v1"
mode = "cookie"
request_timeout_secs = 0

[storage]
backend = "memory"
"#,
        )
        .unwrap();

        let config = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com/v1");
        assert_eq!(config.mode, CredentialMode::Cookie);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.xsrf.header_name, "X-XSRF-TOKEN");
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let config = SessionConfig {
            api_base_url: "ftp://example.com".to_string(),
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_open_file_storage_in_data_dir() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::default();
        let storage = config.open_storage(dir.path()).unwrap();

        storage.set("auth_token", "abc").unwrap();
        assert!(dir.path().join(SESSION_FILE).exists());
    }
}
