use std::sync::Arc;

use anyhow::{Result, bail};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::http::HttpClient;

/// Thin facade over the Telegram Bot API: HTML-parse-mode messages with
/// an optional inline keyboard of label + URL buttons.
pub struct TelegramBot {
    http: Arc<HttpClient>,
    token: String,
    news_chat_id: String,
    service_chat_id: String,
}

impl TelegramBot {
    pub fn new(http: Arc<HttpClient>, config: &TelegramConfig) -> Self {
        Self {
            http,
            token: config.bot_token.clone(),
            news_chat_id: config.news_chat_id.clone(),
            service_chat_id: config.service_chat_id.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.news_chat_id.is_empty()
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        html: &str,
        keyboard: Option<&[(String, String)]>,
    ) -> Result<()> {
        if self.token.is_empty() {
            bail!("telegram bot token is not configured");
        }

        let mut payload = json!({
            "chat_id": chat_id,
            "text": html,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(buttons) = keyboard {
            let rows: Vec<Vec<serde_json::Value>> = buttons
                .iter()
                .map(|(label, url)| vec![json!({"text": label, "url": url})])
                .collect();
            payload["reply_markup"] = json!({ "inline_keyboard": rows });
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let response = self.http.post_json(&url, &payload, None).await?;

        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap_or_default();
        let ok = body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
        if response.status != 200 || !ok {
            let description = body
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            bail!("sendMessage failed ({}): {description}", response.status);
        }

        debug!(chat_id, chars = html.chars().count(), "telegram message sent");
        Ok(())
    }

    /// Digest delivery to the news chat.
    pub async fn send_news(&self, html: &str) -> Result<()> {
        self.send_message(&self.news_chat_id, html, None).await
    }

    /// Operational notifications to the service chat; best effort.
    pub async fn send_service(&self, text: &str) {
        if self.service_chat_id.is_empty() {
            return;
        }
        if let Err(e) = self.send_message(&self.service_chat_id, text, None).await {
            warn!(error = %e, "service notification failed");
        }
    }
}
