use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    /// Shared secret echoed back by Telegram in the
    /// `X-Telegram-Bot-Api-Secret-Token` header on every webhook delivery.
    pub telegram_webhook_secret: String,
    pub gitlab_url: String,
    pub gitlab_token: String,
    pub jira_url: String,
    pub jira_user: String,
    pub jira_token: String,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Optional bearer token for /status endpoint authentication.
    /// If not set, /status is disabled (returns 403 Forbidden).
    pub status_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .context("TELEGRAM_BOT_TOKEN environment variable is required")?;

        let telegram_webhook_secret = env::var("TELEGRAM_WEBHOOK_SECRET")
            .context("TELEGRAM_WEBHOOK_SECRET environment variable is required")?;

        let gitlab_url =
            env::var("GITLAB_URL").context("GITLAB_URL environment variable is required")?;

        let gitlab_token =
            env::var("GITLAB_TOKEN").context("GITLAB_TOKEN environment variable is required")?;

        let jira_url = env::var("JIRA_URL").context("JIRA_URL environment variable is required")?;

        let jira_user =
            env::var("JIRA_USER").context("JIRA_USER environment variable is required")?;

        let jira_token =
            env::var("JIRA_TOKEN").context("JIRA_TOKEN environment variable is required")?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let status_auth_token = parse_status_auth_token(env::var("STATUS_AUTH_TOKEN").ok());

        Ok(Config {
            telegram_bot_token,
            telegram_webhook_secret,
            gitlab_url,
            gitlab_token,
            jira_url,
            jira_user,
            jira_token,
            port,
            state_dir,
            status_auth_token,
        })
    }
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace.
/// This prevents an empty token from allowing unauthenticated access.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
