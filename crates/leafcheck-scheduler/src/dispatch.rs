//! Notification dispatch: sends the batch summary to configured targets.
//! Supports: Telegram Bot API, generic HTTP webhook.
//! Delivery failures are logged, never returned to the batch.

use async_trait::async_trait;
use leafcheck_core::config::NotifyConfig;
use leafcheck_core::error::{LeafcheckError, Result};
use leafcheck_core::traits::BatchNotifier;
use leafcheck_core::types::RunResult;
use std::sync::RwLock;
use std::time::Duration;

use crate::notify::BatchSummary;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification target configuration.
#[derive(Debug, Clone)]
pub enum NotifyTarget {
    /// Telegram Bot API: send via `sendMessage`.
    Telegram {
        api_base: String,
        bot_token: String,
        chat_id: String,
    },
    /// Generic HTTP webhook: POST with JSON body.
    Webhook { url: String },
}

impl NotifyTarget {
    fn kind(&self) -> &'static str {
        match self {
            NotifyTarget::Telegram { .. } => "telegram",
            NotifyTarget::Webhook { .. } => "webhook",
        }
    }
}

/// Sends each finished batch to every configured target.
pub struct Notifier {
    client: reqwest::Client,
    targets: RwLock<Vec<NotifyTarget>>,
}

impl Notifier {
    pub fn new(targets: Vec<NotifyTarget>) -> Self {
        Self {
            client: reqwest::Client::new(),
            targets: RwLock::new(targets),
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(targets_from_config(config))
    }

    /// Swap in targets from an updated config; applies to the next batch.
    pub fn reload(&self, config: &NotifyConfig) {
        let targets = targets_from_config(config);
        tracing::info!("🔄 Notification targets reloaded ({})", targets.len());
        if let Ok(mut current) = self.targets.write() {
            *current = targets;
        }
    }

    pub fn targets(&self) -> Vec<NotifyTarget> {
        self.targets.read().map(|t| t.clone()).unwrap_or_default()
    }

    /// Dispatch a summary to one target.
    pub async fn dispatch(&self, summary: &BatchSummary, target: &NotifyTarget) -> Result<()> {
        match target {
            NotifyTarget::Telegram {
                api_base,
                bot_token,
                chat_id,
            } => self.send_telegram(api_base, bot_token, chat_id, summary).await,
            NotifyTarget::Webhook { url } => self.send_webhook(url, summary).await,
        }
    }

    async fn send_telegram(
        &self,
        api_base: &str,
        bot_token: &str,
        chat_id: &str,
        summary: &BatchSummary,
    ) -> Result<()> {
        let url = format!("{api_base}/bot{bot_token}/sendMessage");
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": summary.body,
                "parse_mode": "HTML",
            }))
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            // reqwest errors embed the URL, which carries the bot token
            .map_err(|e| LeafcheckError::Notify(format!("Telegram send failed: {}", e.without_url())))?;

        if resp.status().is_success() {
            tracing::info!("✅ Telegram summary sent ({}/{})", summary.success, summary.total);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(LeafcheckError::Notify(format!("Telegram API error {status}: {body}")))
        }
    }

    /// Webhook URLs often carry a secret, so neither logs nor errors name it.
    async fn send_webhook(&self, url: &str, summary: &BatchSummary) -> Result<()> {
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "title": summary.title,
                "body": summary.body,
                "success": summary.success,
                "total": summary.total,
            }))
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|e| LeafcheckError::Notify(format!("Webhook send failed: {}", e.without_url())))?;

        if resp.status().is_success() {
            tracing::info!("✅ Webhook summary sent ({}/{})", summary.success, summary.total);
            Ok(())
        } else {
            Err(LeafcheckError::Notify(format!("Webhook error {}", resp.status())))
        }
    }
}

fn targets_from_config(config: &NotifyConfig) -> Vec<NotifyTarget> {
    let mut targets = Vec::new();
    if config.telegram.is_configured() {
        targets.push(NotifyTarget::Telegram {
            api_base: config.telegram.api_base.trim_end_matches('/').to_string(),
            bot_token: config.telegram.bot_token.clone(),
            chat_id: config.telegram.chat_id.clone(),
        });
    }
    if !config.webhook_url.trim().is_empty() {
        targets.push(NotifyTarget::Webhook {
            url: config.webhook_url.trim().to_string(),
        });
    }
    targets
}

#[async_trait]
impl BatchNotifier for Notifier {
    async fn notify(&self, results: &[RunResult]) {
        let targets = self.targets();
        if targets.is_empty() {
            tracing::info!("ℹ️ No notification target configured, skipping summary");
            return;
        }

        let summary = BatchSummary::build(results, chrono::Utc::now());
        for target in &targets {
            if let Err(e) = self.dispatch(&summary, target).await {
                tracing::warn!("⚠️ {} notification failed: {e}", target.kind());
            }
        }
    }
}
