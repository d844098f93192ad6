use super::notifier::{AlertEvent, AlertSink};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use url::Url;

const MESSAGE_LIMIT: usize = 2000;
const TRUNCATED_SUFFIX: &str = "\n... (truncated)";

/// Posts `{"text": ...}` to a chat-style incoming webhook.
pub(crate) struct WebhookAlertSink {
    webhook_url: Url,
    client: Client,
}

impl WebhookAlertSink {
    pub(crate) fn new(webhook_url: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .map_err(|err| anyhow!("alert webhook client failed to build: {err}"))?;

        Ok(Self {
            webhook_url,
            client,
        })
    }
}

pub(crate) fn format_alert(event: &AlertEvent) -> String {
    let mut lines = vec![
        format!(
            "[{}] {} ({}/{})",
            event.level.as_str(),
            event.service_name,
            event.environment,
            event.component
        ),
        format!(
            "{} {}{}",
            event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            event.target,
            match (&event.file, event.line) {
                (Some(file), Some(line)) => format!(" {file}:{line}"),
                _ => String::new(),
            }
        ),
    ];

    if let Some(message) = event.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        lines.push(format!("> {message}"));
    }

    if !event.spans.is_empty() {
        let chain = event
            .spans
            .iter()
            .map(|span| span.name.as_str())
            .collect::<Vec<_>>()
            .join(" > ");
        lines.push(format!("spans: {chain}"));
    }

    for (key, value) in &event.fields {
        lines.push(format!("- {key} = {value}"));
    }
    for span in event.spans.iter().filter(|span| !span.fields.is_empty()) {
        for (key, value) in &span.fields {
            lines.push(format!("- {}.{key} = {value}", span.name));
        }
    }

    truncate_message(lines.join("\n"))
}

pub(crate) fn truncate_message(content: String) -> String {
    if content.chars().count() <= MESSAGE_LIMIT {
        return content;
    }
    let keep = MESSAGE_LIMIT.saturating_sub(TRUNCATED_SUFFIX.chars().count());
    let mut truncated: String = content.chars().take(keep).collect();
    truncated.push_str(TRUNCATED_SUFFIX);
    truncated
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "text": format_alert(event) }))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    anyhow!("alert webhook request timed out")
                } else if err.is_connect() {
                    anyhow!("alert webhook connection failed")
                } else {
                    anyhow!("alert webhook request failed")
                }
            })?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(anyhow!(
            "alert webhook returned non-success status: {}",
            response.status()
        ))
    }

    fn sink_name(&self) -> &'static str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::notifier::SpanSummary;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tracing::Level;

    #[test]
    fn long_messages_are_cut_to_the_limit() {
        let content = "x".repeat(MESSAGE_LIMIT + 500);
        let truncated = truncate_message(content);
        assert_eq!(truncated.chars().count(), MESSAGE_LIMIT);
        assert!(truncated.ends_with(TRUNCATED_SUFFIX));

        let short = truncate_message("fine".to_string());
        assert_eq!(short, "fine");
    }

    #[test]
    fn alert_text_includes_fields_and_spans() {
        let mut fields = BTreeMap::new();
        fields.insert("record_id".to_string(), "1700-abc".to_string());
        let mut span_fields = BTreeMap::new();
        span_fields.insert("stream_id".to_string(), "st_1".to_string());

        let event = AlertEvent {
            level: Level::ERROR,
            timestamp: Utc::now(),
            service_name: "uplink".into(),
            environment: "prod".into(),
            component: "agent".into(),
            target: "stream_uplink::delivery".into(),
            file: Some("src/delivery.rs".into()),
            line: Some(42),
            message: Some("delivery_agent: record failed".into()),
            fields,
            spans: vec![SpanSummary {
                name: "live_session".into(),
                fields: span_fields,
            }],
        };

        let text = format_alert(&event);
        assert!(text.starts_with("[ERROR] uplink (prod/agent)"));
        assert!(text.contains("src/delivery.rs:42"));
        assert!(text.contains("> delivery_agent: record failed"));
        assert!(text.contains("- record_id = 1700-abc"));
        assert!(text.contains("- live_session.stream_id = st_1"));
    }
}
