//! CLI commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use reqwest::Method;
use std::path::PathBuf;
use tracing::info;
use turnstile_core::{CredentialMode, Navigation, guard};
use turnstile_http::{RegisterRequest, SessionClient};

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    #[command(flatten)]
    Session(SessionCommands),

    /// Configuration file helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Commands that run against the API with the stored session
#[derive(Subcommand)]
pub enum SessionCommands {
    /// Log in with username and password
    Login {
        #[arg(short, long)]
        username: String,

        /// Password (prompting is not supported; prefer the environment variable)
        #[arg(short, long, env = "TURNSTILE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Login URL a guard redirected to, e.g. "/login?returnUrl=%2Fprofile"
        #[arg(long)]
        from: Option<String>,
    },

    /// Create an account
    Register {
        #[arg(long)]
        firstname: String,

        #[arg(long)]
        lastname: String,

        #[arg(long)]
        email: String,

        #[arg(long, env = "TURNSTILE_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long, default_value = "USER")]
        role: String,
    },

    /// Forget the session and notify the server
    Logout,

    /// Show the current session
    Status {
        /// Also show whether this route would be reachable
        #[arg(long)]
        route: Option<String>,
    },

    /// Renew the session now
    Refresh,

    /// GET an API path with the current session and print the body
    Get {
        /// Path relative to the API base URL, e.g. /users/me
        path: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a configuration file with every default spelled out
    Init {
        /// Output file path (defaults to ./turnstile.toml)
        output: Option<PathBuf>,
    },
}

impl Commands {
    pub async fn execute(self, data_dir: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
        match self {
            Commands::Session(command) => command.execute(data_dir, config_path).await,
            Commands::Config { command } => command.execute(),
        }
    }
}

impl SessionCommands {
    pub async fn execute(self, data_dir: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
        let config = config::load_config(config_path.as_deref())?;
        let client = config::build_client(&config, &data_dir)?;
        client.resume().await.context("restoring session")?;

        match self {
            SessionCommands::Login {
                username,
                password,
                from,
            } => login(&client, &username, &password, from.as_deref()).await,
            SessionCommands::Register {
                firstname,
                lastname,
                email,
                password,
                role,
            } => {
                let profile = RegisterRequest {
                    firstname,
                    lastname,
                    email,
                    password,
                    role,
                };
                register(&client, &profile).await
            }
            SessionCommands::Logout => logout(&client).await,
            SessionCommands::Status { route } => {
                status(&client, route.as_deref());
                Ok(())
            }
            SessionCommands::Refresh => refresh(&client).await,
            SessionCommands::Get { path } => get(&client, &path).await,
        }
    }
}

impl ConfigCommands {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommands::Init { output } => {
                let path = output.unwrap_or_else(|| PathBuf::from("turnstile.toml"));
                if path.exists() {
                    bail!("{} already exists", path.display());
                }
                config::generate_default_config(&path)?;
                println!("Wrote default configuration to {}", path.display());
                Ok(())
            }
        }
    }
}

async fn login(
    client: &SessionClient,
    username: &str,
    password: &str,
    from: Option<&str>,
) -> Result<()> {
    let session = client.login(username, password).await?;
    info!(username, "Login succeeded");
    println!("Logged in as {username} ({} mode)", client.mode());
    if session.refresh_token.is_none() && client.mode() == CredentialMode::Token {
        println!("Warning: server issued no refresh token; the session cannot be renewed");
    }
    if let Some(from) = from {
        let query = from.split_once('?').map_or("", |(_, query)| query);
        println!("Continue at {}", guard::return_url(query));
    }
    Ok(())
}

async fn register(client: &SessionClient, profile: &RegisterRequest) -> Result<()> {
    let ack = client.register(profile).await?;
    println!("Registered {}", profile.email);
    if !ack.is_null() {
        println!("{}", serde_json::to_string_pretty(&ack)?);
    }
    Ok(())
}

async fn logout(client: &SessionClient) -> Result<()> {
    if let Some(notification) = client.logout() {
        // The process is about to exit; give the notification its chance.
        let _ = notification.await;
    }
    println!("Logged out");
    Ok(())
}

fn status(client: &SessionClient, route: Option<&str>) {
    let session = client.session();
    println!("API:           {}", client.base_url());
    println!("Mode:          {}", client.mode());
    println!("Authenticated: {}", session.is_authenticated);
    if client.mode() == CredentialMode::Token {
        println!(
            "Refresh token: {}",
            if session.refresh_token.is_some() { "present" } else { "absent" }
        );
    }
    if let Some(route) = route {
        match client.guard().can_activate(route) {
            Navigation::Allow => println!("Route {route}: allowed"),
            Navigation::Redirect { to } => println!("Route {route}: redirect to {to}"),
        }
    }
}

async fn refresh(client: &SessionClient) -> Result<()> {
    client.refresh().await.context("session refresh failed")?;
    println!("Session refreshed");
    Ok(())
}

async fn get(client: &SessionClient, path: &str) -> Result<()> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let response = client.send(client.request(Method::GET, &path)).await;
    let response = match response {
        Err(e) if e.is_auth_expired() => {
            bail!("{e}; log in again with `turnstile login`")
        }
        other => other?,
    };

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        bail!("{status}: {body}");
    }
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }
    Ok(())
}
