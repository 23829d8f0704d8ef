//! Operator notifications.
//!
//! Fire-and-forget: the guard logs a failed delivery and moves on; a
//! notification never changes a reconciliation result.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sg_core::config::TelegramConfig;
use tracing::{info, warn};

/// Notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}

/// Deliver `text`, logging instead of propagating a failure.
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.notify(text).await {
        warn!("[notify] delivery failed: {e:#}");
    }
}

/// Telegram or, without credentials, the log.
pub fn from_config(telegram: Option<&TelegramConfig>) -> Arc<dyn Notifier> {
    match telegram {
        Some(cfg) if !cfg.bot_token.is_empty() && !cfg.chat_id.is_empty() => {
            info!("[notify] telegram chat {}", cfg.chat_id);
            Arc::new(TelegramNotifier::new(cfg))
        }
        _ => {
            info!("[notify] telegram not configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    }
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

/// Bot API `sendMessage` sender.
pub struct TelegramNotifier {
    http: reqwest::Client,
    url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(cfg: &TelegramConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: send_message_url(&cfg.api_url, &cfg.bot_token),
            chat_id: cfg.chat_id.clone(),
        }
    }
}

fn send_message_url(api_url: &str, bot_token: &str) -> String {
    format!("{}/bot{bot_token}/sendMessage", api_url.trim_end_matches('/'))
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("telegram sendMessage")?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            bail!("telegram sendMessage HTTP {status}: {detail}");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

/// Writes notifications to the log at INFO.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        info!("[notify] {}", text.replace('\n', " | "));
        Ok(())
    }
}
