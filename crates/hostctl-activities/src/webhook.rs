//! `Webhook`: outbound notification delivery (§6), used by the incident
//! escalation cron and other ambient notifications.
//!
//! Error classification follows the literal rule from §6: 2xx success,
//! 4xx non-retryable, 5xx/network retryable.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Activity, ActivityError, Heartbeat};

/// The HTTP surface a [`Webhook`] activity posts to.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// POST `body` as JSON to `url`, returning the response status code.
    async fn post(&self, url: &str, body: Value) -> anyhow::Result<u16>;
}

/// Typed input for [`Webhook`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookInput {
    /// Destination URL.
    pub url: String,
    /// JSON body to post.
    pub body: Value,
}

/// Severity-to-emoji mapping for the Slack Block Kit template (§6).
pub fn severity_emoji(severity: &str) -> &'static str {
    match severity {
        "critical" => ":rotating_light:",
        "warning" => ":warning:",
        _ => ":information_source:",
    }
}

/// Build a Slack Block Kit payload for an incident notification.
pub fn slack_incident_payload(event: &str, severity: &str, title: &str, detail: &str) -> Value {
    serde_json::json!({
        "blocks": [
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("{} *{}* — {}\n{}", severity_emoji(severity), event, title, detail),
                }
            }
        ]
    })
}

/// POSTs a JSON body and classifies the HTTP response per §6: 2xx is
/// success, 4xx is non-retryable, 5xx (and any transport error) is
/// retryable.
pub struct Webhook {
    sender: Arc<dyn WebhookSender>,
}

impl Webhook {
    /// Build the activity.
    pub fn new(sender: Arc<dyn WebhookSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Activity for Webhook {
    type Input = WebhookInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "Webhook"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        let status = self.sender.post(&input.url, input.body).await.map_err(ActivityError::Retryable)?;

        if (200..300).contains(&status) {
            Ok(())
        } else if (400..500).contains(&status) {
            Err(ActivityError::NonRetryable(anyhow::anyhow!("webhook returned {status}")))
        } else {
            Err(ActivityError::Retryable(anyhow::anyhow!("webhook returned {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStatus(u16);

    #[async_trait]
    impl WebhookSender for FixedStatus {
        async fn post(&self, _url: &str, _body: Value) -> anyhow::Result<u16> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn four_xx_is_non_retryable() {
        let activity = Webhook::new(Arc::new(FixedStatus(404)));
        let mut hb = Heartbeat::new(Arc::new(hostctl_engine::NullHeartbeatSink));
        let err = activity
            .run(WebhookInput { url: "https://hooks.test/x".into(), body: Value::Null }, "key-1", &mut hb)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn five_xx_is_retryable() {
        let activity = Webhook::new(Arc::new(FixedStatus(503)));
        let mut hb = Heartbeat::new(Arc::new(hostctl_engine::NullHeartbeatSink));
        let err = activity
            .run(WebhookInput { url: "https://hooks.test/x".into(), body: Value::Null }, "key-1", &mut hb)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn two_xx_succeeds() {
        let activity = Webhook::new(Arc::new(FixedStatus(204)));
        let mut hb = Heartbeat::new(Arc::new(hostctl_engine::NullHeartbeatSink));
        activity
            .run(WebhookInput { url: "https://hooks.test/x".into(), body: Value::Null }, "key-1", &mut hb)
            .await
            .unwrap();
    }

    #[test]
    fn critical_severity_maps_to_rotating_light() {
        assert_eq!(severity_emoji("critical"), ":rotating_light:");
    }
}
