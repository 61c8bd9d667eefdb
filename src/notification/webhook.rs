//! Gateway webhook notifier.
//!
//! Posts outcome messages to a single gateway endpoint as embed-style JSON,
//! with the routing target carried in the body. Rate-limited responses are
//! retried respecting the Retry-After header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use super::{Notifier, WatchOutcome};
use crate::watch::WatchDirection;
use crate::{Error, Result};

/// Retry ceiling for rate-limited posts.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

const COLOR_BAN: u32 = 0xe74c3c;
const COLOR_RECOVERY: u32 = 0x2ecc71;

/// Gateway webhook configuration.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    /// Gateway endpoint URL. Empty disables the notifier.
    pub gateway_url: String,
    /// Bearer token presented to the gateway.
    pub gateway_token: String,
}

/// Notifier that posts outcomes to the gateway endpoint.
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.gateway_url.is_empty()
    }

    fn color(direction: WatchDirection) -> u32 {
        match direction {
            WatchDirection::AwaitingBan => COLOR_BAN,
            WatchDirection::AwaitingRecovery => COLOR_RECOVERY,
        }
    }

    /// Build the rich embed payload for an outcome.
    fn build_payload(&self, outcome: &WatchOutcome) -> serde_json::Value {
        let mut embed = json!({
            "title": outcome.title(),
            "description": outcome.description(),
            "color": Self::color(outcome.direction),
            "timestamp": outcome.detected_at.to_rfc3339(),
        });

        if let Some(avatar_url) = outcome
            .snapshot
            .as_ref()
            .and_then(|s| s.avatar_url.clone())
        {
            embed["thumbnail"] = json!({ "url": avatar_url });
        }

        json!({
            "target": outcome.target,
            "render_card": outcome.render_card,
            "embeds": [embed],
        })
    }

    /// Build the degraded plain-text payload.
    fn build_fallback_payload(&self, outcome: &WatchOutcome) -> serde_json::Value {
        json!({
            "target": outcome.target,
            "render_card": false,
            "content": format!("{}\n{}", outcome.title(), outcome.description()),
        })
    }

    /// Post with rate limit handling, retrying 429s per Retry-After.
    async fn post_with_retry(&self, payload: &serde_json::Value) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(&self.config.gateway_url)
                .bearer_auth(&self.config.gateway_token)
                .json(payload)
                .send()
                .await
                .map_err(|e| Error::Other(format!("Gateway request failed: {}", e)))?;

            let status = response.status();

            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let retry_after = parse_retry_after(&response);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Gateway rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::Other(format!(
                        "Gateway rate limit exceeded after {} retries",
                        MAX_RATE_LIMIT_RETRIES
                    )));
                }

                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Gateway rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            warn!("Gateway webhook failed: {} - {}", status, body);
            return Err(Error::Other(format!(
                "Gateway webhook failed: {} - {}",
                status, body
            )));
        }
    }
}

/// Parse the Retry-After duration from a 429 response.
fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    let retry_after = response.headers().get("Retry-After")?;
    let secs = retry_after.to_str().ok()?.parse::<f64>().ok()?;
    Some(Duration::from_secs_f64(secs))
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, outcome: &WatchOutcome) -> Result<()> {
        if !self.is_enabled() {
            debug!("Gateway webhook not configured, skipping notification");
            return Ok(());
        }

        let payload = self.build_payload(outcome);
        self.post_with_retry(&payload).await?;

        debug!(handle = %outcome.handle, "Gateway notification sent");
        Ok(())
    }

    async fn send_fallback(&self, outcome: &WatchOutcome) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let payload = self.build_fallback_payload(outcome);
        self.post_with_retry(&payload).await
    }
}
