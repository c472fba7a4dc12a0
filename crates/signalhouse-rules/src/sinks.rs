//! Alert delivery sinks.
//!
//! Every sink performs one POST per alert with a shared 10-second deadline.
//! Sinks are independent: the engine fans out to each on its own task, so a
//! slow or failing sink never blocks the others.

use crate::alert::Alert;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Per-request deadline applied to every sink POST.
pub const SINK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink returned status {0}")]
    Status(u16),
}

/// Build the HTTP client shared by every sink.
pub fn sink_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(SINK_TIMEOUT).build()
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, alert: &Alert) -> Result<(), SinkError>;
}

/// Generic webhook: the alert record as JSON.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        check_status(response)
    }
}

/// Alertmanager-compatible aggregator: array-of-alert schema on /api/v2/alerts.
pub struct AlertmanagerSink {
    client: reqwest::Client,
    url: String,
}

impl AlertmanagerSink {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        let url = format!("{}/api/v2/alerts", base_url.trim_end_matches('/'));
        Self { client, url }
    }
}

/// Translate an alert into the aggregator's labels/annotations shape.
pub(crate) fn alertmanager_payload(alert: &Alert) -> serde_json::Value {
    let mut labels = alert.labels.clone();
    labels.insert("alertname".to_string(), alert.rule_name.clone());
    labels.insert("severity".to_string(), alert.severity.as_str().to_string());
    labels.insert("service".to_string(), alert.service.clone());

    json!([{
        "labels": labels,
        "annotations": alert.annotations,
        "startsAt": alert.fired_at.to_rfc3339(),
    }])
}

#[async_trait]
impl AlertSink for AlertmanagerSink {
    fn name(&self) -> &'static str {
        "alertmanager"
    }

    async fn send(&self, alert: &Alert) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&alertmanager_payload(alert))
            .send()
            .await?;
        check_status(response)
    }
}

/// Chat webhook with a severity-colored attachment.
pub struct SlackSink {
    client: reqwest::Client,
    url: String,
}

impl SlackSink {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

pub(crate) fn slack_payload(alert: &Alert) -> serde_json::Value {
    json!({
        "attachments": [{
            "color": alert.severity.color(),
            "title": format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.rule_name),
            "text": format!(
                "service `{}`: {} = {:.4} (threshold {:.4})",
                alert.service, alert.metric_name, alert.value, alert.threshold
            ),
            "ts": alert.fired_at.timestamp(),
        }]
    })
}

#[async_trait]
impl AlertSink for SlackSink {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, alert: &Alert) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&slack_payload(alert))
            .send()
            .await?;
        check_status(response)
    }
}

fn check_status(response: reqwest::Response) -> Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SinkError::Status(status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleSeverity;
    use chrono::Utc;
    use std::collections::HashMap;

    fn alert() -> Alert {
        Alert {
            rule_id: "high-cpu".to_string(),
            rule_name: "High CPU".to_string(),
            severity: RuleSeverity::Warning,
            service: "web".to_string(),
            metric_name: "system.cpu.utilization".to_string(),
            value: 0.95,
            threshold: 0.9,
            labels: HashMap::from([("team".to_string(), "platform".to_string())]),
            annotations: HashMap::from([("runbook".to_string(), "wiki/cpu".to_string())]),
            fired_at: Utc::now(),
        }
    }

    #[test]
    fn test_alertmanager_payload_shape() {
        let payload = alertmanager_payload(&alert());
        let entry = &payload[0];
        assert_eq!(entry["labels"]["alertname"], "High CPU");
        assert_eq!(entry["labels"]["severity"], "warning");
        assert_eq!(entry["labels"]["service"], "web");
        assert_eq!(entry["labels"]["team"], "platform");
        assert_eq!(entry["annotations"]["runbook"], "wiki/cpu");
        assert!(entry["startsAt"].is_string());
    }

    #[test]
    fn test_slack_payload_uses_severity_color() {
        let payload = slack_payload(&alert());
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["color"], RuleSeverity::Warning.color());
        assert!(attachment["title"]
            .as_str()
            .unwrap()
            .contains("WARNING"));
        assert!(attachment["text"].as_str().unwrap().contains("web"));
    }

    #[test]
    fn test_alertmanager_url_normalization() {
        let client = sink_http_client().unwrap();
        let sink = AlertmanagerSink::new(client.clone(), "http://am:9093/".to_string());
        assert_eq!(sink.url, "http://am:9093/api/v2/alerts");
        let sink = AlertmanagerSink::new(client, "http://am:9093".to_string());
        assert_eq!(sink.url, "http://am:9093/api/v2/alerts");
    }
}
