//! Telegram bot notifications
//!
//! Sends stall alerts to a chat through the Bot API `sendMessage` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::traits::Notifier;
use crate::config::NotifierConfig;
use crate::error::{LivescoreError, Result};
use crate::supervisor::StallAlert;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram notification client
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

impl TelegramNotifier {
    /// Build from config; `None` when token or chat id is missing
    pub fn from_config(cfg: &NotifierConfig) -> Option<Arc<Self>> {
        match (&cfg.telegram_bot_token, &cfg.telegram_chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                info!("Telegram notifications enabled");
                Some(Self::new(token, chat_id))
            }
            _ => None,
        }
    }

    /// Create a notifier with explicit credentials
    pub fn new(bot_token: &str, chat_id: &str) -> Arc<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Arc::new(Self {
            client,
            api_url: format!("{}/bot{}/sendMessage", TELEGRAM_API, bot_token),
            chat_id: chat_id.to_string(),
        })
    }

    /// Send a Markdown message to the configured chat
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let message = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
        };

        let resp = self
            .client
            .post(&self.api_url)
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                error!("Telegram request failed: {}", e);
                LivescoreError::Notification(e.to_string())
            })?;

        if resp.status().is_success() {
            debug!("Telegram alert sent to chat {}", self.chat_id);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Telegram API returned an error: {} - {}", status, body);
            Err(LivescoreError::Notification(format!("HTTP {}: {}", status, body)))
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_alert(&self, alert: &StallAlert) -> Result<()> {
        self.send_message(&alert.format_message()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_credentials() {
        let cfg = NotifierConfig {
            telegram_bot_token: Some("123:abc".to_string()),
            telegram_chat_id: None,
        };
        assert!(TelegramNotifier::from_config(&cfg).is_none());
    }

    #[test]
    fn test_api_url() {
        let notifier = TelegramNotifier::new("123:abc", "-1001");
        assert_eq!(
            notifier.api_url,
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }
}
