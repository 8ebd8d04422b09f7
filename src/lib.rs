pub mod collaborator;
pub mod command;
pub mod config;
pub mod gitlab;
pub mod jira;
pub mod lifecycle;
pub mod roster;
pub mod status;
pub mod telegram;
pub mod webhook;

use std::sync::Arc;

use lifecycle::ReviewLifecycle;
use roster::repository::ReviewerRepository;
use telegram::TelegramClient;

pub fn bot_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Shared application state: every dependency is constructed once at
/// startup and passed in explicitly.
pub struct AppState {
    pub repository: Arc<dyn ReviewerRepository>,
    pub lifecycle: ReviewLifecycle,
    pub telegram_client: TelegramClient,
    pub webhook_secret: String,
    pub status_auth_token: Option<String>,
}
