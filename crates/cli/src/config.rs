//! CLI configuration utilities

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use turnstile_core::SessionConfig;
use turnstile_http::{SessionClient, SessionClientBuilder};

/// Overrides the default data directory
pub const STATE_DIR_ENV: &str = "TURNSTILE_STATE_DIR";

/// Pick the data directory: explicit flag, then environment, then the
/// platform data dir
pub fn resolve_data_dir(data_dir: Option<PathBuf>) -> PathBuf {
    data_dir.unwrap_or_else(|| {
        // Check environment variable first, then fall back to system data dir
        if let Ok(state_dir) = std::env::var(STATE_DIR_ENV) {
            PathBuf::from(state_dir)
        } else {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("turnstile")
        }
    })
}

/// Load configuration from `path`, or from the default locations
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => SessionConfig::load().context("loading configuration"),
    }
}

/// Build a session client backed by the configured storage
pub fn build_client(config: &SessionConfig, data_dir: &Path) -> Result<SessionClient> {
    let storage = config
        .open_storage(data_dir)
        .context("opening session storage")?;
    let client = SessionClientBuilder::from_config(config)
        .storage(storage)
        .build()?;
    Ok(client)
}

/// Generate a default configuration file
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let content = toml::to_string_pretty(&SessionConfig::default())?;
    if let Some(parent) = path
        .as_ref()
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use turnstile_core::CredentialMode;

    #[test]
    fn test_explicit_data_dir_wins() {
        let dir = PathBuf::from("/tmp/explicit");
        assert_eq!(resolve_data_dir(Some(dir.clone())), dir);
    }

    #[test]
    fn test_generated_config_loads_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("conf").join("turnstile.toml");

        generate_default_config(&path).unwrap();
        let loaded = load_config(Some(&path)).unwrap();

        assert_eq!(loaded.api_base_url, "http://localhost:8080/api/v1");
        assert_eq!(loaded.mode, CredentialMode::Token);
    }

    #[test]
    fn test_build_client_uses_file_storage() {
        let temp = TempDir::new().unwrap();
        let client = build_client(&SessionConfig::default(), temp.path()).unwrap();

        client
            .store()
            .set_authenticated(Some(turnstile_core::AuthTokens::new("a1", None)))
            .unwrap();
        assert!(temp.path().join("session.json").exists());
    }
}
