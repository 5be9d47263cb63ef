// libs/sla-cell/src/services/notify.rs
use serde_json::json;
use tracing::{info, warn};

use shared_config::AppConfig;

/// Thin client for the external notification webhook. Delivery transports
/// (email/SMS/push) live behind that webhook; this side only posts the
/// payload and reports whether the hand-off was accepted.
pub struct NotificationDispatcher {
    client: reqwest::Client,
    webhook_url: String,
}

impl NotificationDispatcher {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: config.notification_webhook_url.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    /// Send one notification. When no webhook is configured the message is
    /// logged and reported as delivered so escalation flows still complete
    /// in development environments.
    pub async fn dispatch(
        &self,
        recipients: &str,
        channel: &str,
        message: &str,
    ) -> Result<(), String> {
        if !self.is_configured() {
            info!(
                "Notification webhook not configured, logging only: [{}/{}] {}",
                recipients, channel, message
            );
            return Ok(());
        }

        let payload = json!({
            "recipients": recipients,
            "channel": channel,
            "message": message,
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("notification dispatch failed: {}", e))?;

        if !response.status().is_success() {
            warn!(
                "Notification webhook answered {} for [{}/{}]",
                response.status(),
                recipients,
                channel
            );
            return Err(format!(
                "notification webhook returned {}",
                response.status()
            ));
        }

        Ok(())
    }
}
