//! Notification delivery for alerts

use chrono::{DateTime, Utc};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::models::{Alert, Severity};

use super::sources::Notifier;

/// Key account manager responsible for a merchant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KamContact {
    pub merchant_id: String,
    pub merchant_name: String,
    pub kam_name: String,
    pub kam_email: String,
    pub slack_webhook: Option<String>,
}

/// Result of sending a notification on one channel
#[derive(Debug, Clone)]
pub struct NotificationResult {
    pub channel_type: &'static str,
    pub success: bool,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Sends alerts to the KAM's Slack webhook and the operations webhook
pub struct NotificationSender {
    client: Client,
    webhook_url: Option<String>,
}

impl NotificationSender {
    /// Create a new notification sender
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone().filter(|url| !url.is_empty()),
        })
    }

    /// Send the alert on every channel that applies to it
    pub async fn send_all(
        &self,
        alert_id: Uuid,
        alert: &Alert,
        contact: Option<&KamContact>,
    ) -> Vec<NotificationResult> {
        let mut results = Vec::new();

        if let Some((contact, webhook)) =
            contact.and_then(|c| c.slack_webhook.as_deref().map(|w| (c, w)))
        {
            let result = self.send_slack(webhook, alert_id, alert, contact).await;
            results.push(NotificationResult::from_outcome("slack", result));
        }

        if let Some(url) = &self.webhook_url {
            let result = self.send_webhook(url, alert_id, alert, contact).await;
            results.push(NotificationResult::from_outcome("webhook", result));
        }

        results
    }

    /// Send Slack notification
    async fn send_slack(
        &self,
        webhook_url: &str,
        alert_id: Uuid,
        alert: &Alert,
        contact: &KamContact,
    ) -> Result<()> {
        let payload = SlackPayload::for_alert(alert_id, alert, contact);

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::internal(format!("Slack returned {status}: {body}")));
        }

        info!(alert_id = %alert_id, merchant = %contact.merchant_id, "Slack notification sent");
        Ok(())
    }

    /// Send generic webhook notification
    async fn send_webhook(
        &self,
        url: &str,
        alert_id: Uuid,
        alert: &Alert,
        contact: Option<&KamContact>,
    ) -> Result<()> {
        let payload = WebhookPayload {
            alert_id,
            severity: alert.severity,
            alert_type: alert.alert_type.as_str(),
            title: &alert.title,
            tenant_id: alert.scope.tenant_id.as_deref(),
            country: &alert.scope.country,
            provider_id: &alert.scope.provider_id,
            metric_value: alert.metric_value,
            threshold_value: alert.threshold_value,
            revenue_at_risk_usd: alert.revenue_at_risk_usd,
            root_cause: &alert.root_cause.issue,
            suggested_action: &alert.suggested_action.label,
            action_type: alert.suggested_action.action_type.as_str(),
            created_at: alert.created_at,
            kam: contact,
        };

        let response = self.client.post(url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::internal(format!("Webhook returned {status}: {body}")));
        }

        info!(alert_id = %alert_id, url = %url, "Webhook notification sent");
        Ok(())
    }
}

impl NotificationResult {
    fn from_outcome(channel_type: &'static str, outcome: Result<()>) -> Self {
        Self {
            channel_type,
            success: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
            sent_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Notifier for NotificationSender {
    async fn notify(&self, alert_id: Uuid, alert: &Alert, contact: Option<&KamContact>) -> Result<()> {
        let results = self.send_all(alert_id, alert, contact).await;

        for failed in results.iter().filter(|r| !r.success) {
            warn!(
                alert_id = %alert_id,
                channel = failed.channel_type,
                error = failed.error.as_deref().unwrap_or_default(),
                "Notification channel failed"
            );
        }

        if !results.is_empty() && results.iter().all(|r| !r.success) {
            return Err(Error::internal("all notification channels failed"));
        }
        Ok(())
    }
}

// Slack payload types
#[derive(Debug, Serialize)]
struct SlackPayload {
    username: String,
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: &'static str,
    title: String,
    text: String,
    fields: Vec<SlackField>,
    footer: String,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: &'static str,
    value: String,
    short: bool,
}

impl SlackPayload {
    fn for_alert(alert_id: Uuid, alert: &Alert, contact: &KamContact) -> Self {
        let (color, marker) = match alert.severity {
            Severity::Critical => ("#dc3545", "🚨"),
            Severity::Warning => ("#ffc107", "⚠️"),
            Severity::Info => ("#17a2b8", "ℹ️"),
        };

        let mut fields = vec![
            SlackField {
                title: "Severity",
                value: alert.severity.to_string(),
                short: true,
            },
            SlackField {
                title: "Metric Value",
                value: format!("{:.2}", alert.metric_value),
                short: true,
            },
            SlackField {
                title: "Threshold",
                value: format!("{:.2}", alert.threshold_value),
                short: true,
            },
            SlackField {
                title: "Revenue at Risk",
                value: format!("${:.2}", alert.revenue_at_risk_usd),
                short: true,
            },
            SlackField {
                title: "Root Cause",
                value: alert.root_cause.issue.clone(),
                short: false,
            },
            SlackField {
                title: "Suggested Action",
                value: alert.suggested_action.label.clone(),
                short: false,
            },
        ];
        if let Some(seconds) = alert.sla_breach_countdown_seconds {
            fields.push(SlackField {
                title: "SLA Breach In",
                value: format!("{seconds}s"),
                short: true,
            });
        }

        Self {
            username: "PaySentinel".to_string(),
            text: format!("{}, {} needs attention", contact.kam_name, contact.merchant_name),
            attachments: vec![SlackAttachment {
                color,
                title: format!("{marker} {}", alert.title),
                text: alert
                    .llm_explanation
                    .clone()
                    .unwrap_or_else(|| alert.root_cause.issue.clone()),
                fields,
                footer: format!("PaySentinel alert {alert_id}"),
                ts: alert.created_at.timestamp(),
            }],
        }
    }
}

// Generic webhook payload
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    alert_id: Uuid,
    severity: Severity,
    alert_type: &'static str,
    title: &'a str,
    tenant_id: Option<&'a str>,
    country: &'a str,
    provider_id: &'a str,
    metric_value: f64,
    threshold_value: f64,
    revenue_at_risk_usd: f64,
    root_cause: &'a str,
    suggested_action: &'a str,
    action_type: &'static str,
    created_at: DateTime<Utc>,
    kam: Option<&'a KamContact>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::testing::alert_fixture;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn contact(slack_webhook: Option<String>) -> KamContact {
        KamContact {
            merchant_id: "m-1".to_string(),
            merchant_name: "Acme Store".to_string(),
            kam_name: "Dana".to_string(),
            kam_email: "dana@example.com".to_string(),
            slack_webhook,
        }
    }

    fn config(webhook_url: Option<String>) -> NotificationConfig {
        NotificationConfig {
            webhook_url,
            ..NotificationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sends_slack_and_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slack"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "alert_type": "HIGH_ERROR_RATE",
                "kam": {"kam_email": "dana@example.com"}
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sender = NotificationSender::new(&config(Some(format!("{}/hook", server.uri())))).unwrap();
        let contact = contact(Some(format!("{}/slack", server.uri())));
        let alert = alert_fixture();

        let results = sender.send_all(Uuid::new_v4(), &alert, Some(&contact)).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_no_channels_is_ok() {
        let sender = NotificationSender::new(&config(None)).unwrap();
        let alert = alert_fixture();

        assert!(sender.send_all(Uuid::new_v4(), &alert, None).await.is_empty());
        assert!(sender.notify(Uuid::new_v4(), &alert, Some(&contact(None))).await.is_ok());
    }

    #[tokio::test]
    async fn test_notify_fails_when_every_channel_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sender = NotificationSender::new(&config(Some(server.uri()))).unwrap();
        let alert = alert_fixture();

        let results = sender.send_all(Uuid::new_v4(), &alert, None).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap_or_default().contains("500"));

        assert!(sender.notify(Uuid::new_v4(), &alert, None).await.is_err());
    }

    #[test]
    fn test_slack_payload_for_critical_alert() {
        let mut alert = alert_fixture();
        alert.severity = Severity::Critical;
        alert.sla_breach_countdown_seconds = Some(300);

        let payload = SlackPayload::for_alert(Uuid::nil(), &alert, &contact(None));
        let attachment = &payload.attachments[0];

        assert_eq!(attachment.color, "#dc3545");
        assert!(attachment.title.ends_with(&alert.title));
        assert!(attachment.fields.iter().any(|f| f.title == "SLA Breach In" && f.value == "300s"));
        assert!(payload.text.starts_with("Dana"));
    }
}
