//! Outbound Telegram client: replies to chats via the Bot API.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::collaborator::{Collaborator, ExternalCallError};
use crate::roster::ChatId;

/// Upper bound on any single Bot API call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to construct Telegram HTTP client")?;
        Ok(Self {
            client,
            base_url: format!("https://api.telegram.org/bot{}", bot_token),
        })
    }

    /// Send a plain-text message to a chat.
    pub async fn send_message(&self, chat: ChatId, text: &str) -> Result<(), ExternalCallError> {
        const OPERATION: &str = "send message";
        let url = format!("{}/sendMessage", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&SendMessageRequest {
                chat_id: chat.0,
                text,
            })
            .send()
            .await
            .map_err(|e| ExternalCallError::new(Collaborator::Telegram, OPERATION, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalCallError::new(
                Collaborator::Telegram,
                OPERATION,
                format!("{} - {}", status, body),
            ));
        }

        let api: ApiResponse = response.json().await.map_err(|e| {
            ExternalCallError::new(
                Collaborator::Telegram,
                OPERATION,
                format!("invalid response body: {}", e),
            )
        })?;
        if !api.ok {
            return Err(ExternalCallError::new(
                Collaborator::Telegram,
                OPERATION,
                api.description
                    .unwrap_or_else(|| "Bot API reported failure".to_string()),
            ));
        }
        Ok(())
    }
}
