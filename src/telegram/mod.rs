//! Telegram transport.
//!
//! One bot chat serves both directions: outbound notifications
//! (best-effort, never fatal) and inbound operator commands via
//! `getUpdates` long polling with sender authorization.
//!
//! API docs: https://core.telegram.org/bots/api

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const BASE_URL: &str = "https://api.telegram.org";
/// Long-poll hold time for getUpdates (seconds).
const POLL_TIMEOUT_SECS: u64 = 25;
/// Backoff after a failed poll before the next attempt.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Notifier seam
// ---------------------------------------------------------------------------

/// Outbound message channel for status and event notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a formatted message. Failures are the caller's to log;
    /// they must never stop the engine.
    async fn send(&self, text: &str) -> Result<()>;
}

/// Notifier for headless operation (no Telegram credentials).
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        debug!(text, "Notification dropped (no channel configured)");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// API response types (Telegram JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Telegram bot client bound to a single authorized chat.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    token: SecretString,
    chat_id: i64,
}

impl TelegramClient {
    pub fn new(token: SecretString, chat_id: i64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self { http, token, chat_id })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{BASE_URL}/bot{}/{method}", self.token.expose_secret())
    }

    /// Long-poll for operator messages and forward authorized command
    /// text to `commands`. Runs until the receiver side is dropped.
    pub async fn poll_commands(&self, commands: mpsc::Sender<String>) {
        let mut offset: i64 = 0;

        loop {
            let updates = match self.fetch_updates(offset).await {
                Ok(u) => u,
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, retrying");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                let Some(message) = update.message else { continue };
                let Some(text) = message.text else { continue };

                // Authorization: only the configured chat may command.
                if message.chat.id != self.chat_id {
                    warn!(chat_id = message.chat.id, "Ignoring command from unauthorized chat");
                    continue;
                }

                debug!(text = %text, "Operator command received");
                if commands.send(text).await.is_err() {
                    // Engine is gone; stop polling.
                    return;
                }
            }
        }
    }

    async fn fetch_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response: UpdatesResponse = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
            ])
            .send()
            .await
            .context("getUpdates request failed")?
            .error_for_status()
            .context("getUpdates rejected")?
            .json()
            .await
            .context("Unparseable getUpdates response")?;

        anyhow::ensure!(response.ok, "getUpdates returned ok=false");
        Ok(response.result)
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, text: &str) -> Result<()> {
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await
            .context("sendMessage request failed")?;

        anyhow::ensure!(
            response.status().is_success(),
            "sendMessage rejected with {}",
            response.status()
        );
        Ok(())
    }
}
