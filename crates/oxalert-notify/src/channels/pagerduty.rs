use crate::channels::{execute_json, require_http_url, require_non_empty};
use crate::error::Result;
use crate::SendResponse;
use oxalert_common::types::{AlertEvent, Severity};
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagerDutyConfig {
    pub integration_key: String,
    pub service_id: String,
    pub events_url: Option<String>,
}

pub(crate) fn validate(cfg: &PagerDutyConfig) -> Result<()> {
    require_non_empty("integrationKey", &cfg.integration_key)?;
    require_non_empty("serviceId", &cfg.service_id)?;
    if let Some(url) = &cfg.events_url {
        require_http_url("eventsUrl", url)?;
    }
    Ok(())
}

/// Correlates the trigger and resolve events of one instance.
pub fn dedup_key(rule_id: &str, instance_id: &str) -> String {
    format!("oxalert-{rule_id}-{instance_id}")
}

fn pd_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        Severity::Warning => "warning",
        Severity::Info => "info",
    }
}

/// PagerDuty Events API v2.
pub struct PagerDutyAdapter {
    client: reqwest::Client,
    integration_key: String,
    service_id: String,
    events_url: String,
}

impl PagerDutyAdapter {
    pub fn new(cfg: PagerDutyConfig, client: reqwest::Client) -> Result<Self> {
        validate(&cfg)?;
        Ok(Self {
            client,
            integration_key: cfg.integration_key,
            service_id: cfg.service_id,
            events_url: cfg
                .events_url
                .unwrap_or_else(|| DEFAULT_EVENTS_URL.to_string()),
        })
    }

    pub fn payload(&self, event: &AlertEvent) -> Value {
        let inst = &event.instance;
        let dedup = dedup_key(&inst.rule_id, &inst.id);
        if event.is_resolved() {
            return json!({
                "routing_key": self.integration_key,
                "event_action": "resolve",
                "dedup_key": dedup,
            });
        }
        json!({
            "routing_key": self.integration_key,
            "event_action": "trigger",
            "dedup_key": dedup,
            "client": "oxalert",
            "payload": {
                "summary": format!("{}: {}", event.title(), event.message),
                "source": event.node_name,
                "severity": pd_severity(inst.severity),
                "timestamp": event.timestamp.to_rfc3339(),
                "component": inst.metric_name,
                "group": self.service_id,
                "custom_details": {
                    "rule_id": inst.rule_id,
                    "instance_id": inst.id,
                    "node_id": inst.node_id,
                    "condition": inst.condition.as_str(),
                    "threshold": inst.threshold,
                    "value": event.value,
                },
            },
        })
    }

    pub async fn send(&self, event: &AlertEvent) -> SendResponse {
        let body = self.payload(event).to_string();
        let request = self.client.post(&self.events_url);
        execute_json("pagerduty", request, body).await
    }
}
