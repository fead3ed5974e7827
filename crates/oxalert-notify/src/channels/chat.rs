use crate::channels::{execute_json, require_http_url, severity_colour};
use crate::error::Result;
use crate::SendResponse;
use oxalert_common::types::AlertEvent;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    pub webhook_url: String,
}

pub(crate) fn validate(cfg: &ChatConfig) -> Result<()> {
    require_http_url("webhookUrl", &cfg.webhook_url)?;
    Ok(())
}

/// Incoming-webhook flavours sharing one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Slack,
    Discord,
    Teams,
}

impl ChatKind {
    fn service(&self) -> &'static str {
        match self {
            ChatKind::Slack => "slack",
            ChatKind::Discord => "discord",
            ChatKind::Teams => "teams",
        }
    }
}

pub struct ChatAdapter {
    kind: ChatKind,
    webhook_url: String,
    client: reqwest::Client,
}

fn facts(event: &AlertEvent) -> Vec<(&'static str, String)> {
    let inst = &event.instance;
    vec![
        ("Node", event.node_name.clone()),
        ("Metric", inst.metric_name.clone()),
        (
            "Condition",
            format!("{} {:.2}", inst.condition, inst.threshold),
        ),
        ("Value", format!("{:.2}", event.value)),
        ("Severity", inst.severity.to_string()),
        ("Time", event.timestamp.to_rfc3339()),
    ]
}

impl ChatAdapter {
    pub fn new(kind: ChatKind, cfg: ChatConfig, client: reqwest::Client) -> Result<Self> {
        validate(&cfg)?;
        Ok(Self {
            kind,
            webhook_url: cfg.webhook_url,
            client,
        })
    }

    pub fn kind(&self) -> ChatKind {
        self.kind
    }

    pub fn payload(kind: ChatKind, event: &AlertEvent) -> Value {
        let colour = severity_colour(event.instance.severity, event.is_resolved());
        let title = event.title();
        match kind {
            ChatKind::Slack => json!({
                "text": title,
                "attachments": [{
                    "color": format!("#{colour:06X}"),
                    "title": title,
                    "text": event.message,
                    "fields": facts(event)
                        .into_iter()
                        .map(|(k, v)| json!({"title": k, "value": v, "short": true}))
                        .collect::<Vec<_>>(),
                    "ts": event.timestamp.timestamp(),
                }],
            }),
            ChatKind::Discord => json!({
                "embeds": [{
                    "title": title,
                    "description": event.message,
                    "color": colour,
                    "fields": facts(event)
                        .into_iter()
                        .map(|(k, v)| json!({"name": k, "value": v, "inline": true}))
                        .collect::<Vec<_>>(),
                    "timestamp": event.timestamp.to_rfc3339(),
                }],
            }),
            ChatKind::Teams => json!({
                "@type": "MessageCard",
                "@context": "https://schema.org/extensions",
                "themeColor": format!("{colour:06X}"),
                "summary": title,
                "sections": [{
                    "activityTitle": title,
                    "activitySubtitle": event.message,
                    "facts": facts(event)
                        .into_iter()
                        .map(|(k, v)| json!({"name": k, "value": v}))
                        .collect::<Vec<_>>(),
                    "markdown": true,
                }],
            }),
        }
    }

    pub async fn send(&self, event: &AlertEvent) -> SendResponse {
        let body = Self::payload(self.kind, event).to_string();
        let request = self.client.post(&self.webhook_url);
        execute_json(self.kind.service(), request, body).await
    }
}
