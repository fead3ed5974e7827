use crate::channels::{require_http_url, require_non_empty};
use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::SendResponse;
use oxalert_common::types::AlertEvent;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsConfig {
    pub gateway_url: String,
    pub api_key: String,
    pub phone_numbers: Vec<String>,
}

pub(crate) fn validate(cfg: &SmsConfig) -> Result<()> {
    require_http_url("gatewayUrl", &cfg.gateway_url)?;
    require_non_empty("apiKey", &cfg.api_key)?;
    if cfg.phone_numbers.is_empty() {
        return Err(NotifyError::InvalidConfig(
            "phoneNumbers must list at least one number".to_string(),
        ));
    }
    for phone in &cfg.phone_numbers {
        require_non_empty("phoneNumbers entry", phone)?;
    }
    Ok(())
}

pub struct SmsAdapter {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    phone_numbers: Vec<String>,
}

impl SmsAdapter {
    pub fn new(cfg: SmsConfig, client: reqwest::Client) -> Result<Self> {
        validate(&cfg)?;
        Ok(Self {
            client,
            gateway_url: cfg.gateway_url,
            api_key: cfg.api_key,
            phone_numbers: cfg.phone_numbers,
        })
    }

    pub fn format_message(event: &AlertEvent) -> String {
        let tag = if event.is_resolved() { "[RESOLVED]" } else { "" };
        format!(
            "[oxalert][{severity}]{tag} {node}: {message}",
            severity = event.instance.severity,
            node = event.node_name,
            message = event.message,
        )
    }

    /// One POST per number. The attempt fails if any number fails.
    pub async fn send(&self, event: &AlertEvent) -> SendResponse {
        let message = Self::format_message(event);
        let summary = serde_json::json!({
            "to": self.phone_numbers,
            "message": message,
        });
        let mut response = SendResponse {
            request_body: Some(truncate_string(&summary.to_string(), MAX_BODY_LENGTH)),
            ..Default::default()
        };

        let mut failures = Vec::new();
        for phone in &self.phone_numbers {
            let payload = serde_json::json!({
                "to": phone,
                "message": message,
            });
            match self
                .client
                .post(&self.gateway_url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    response.http_status = Some(status.as_u16());
                    let body = resp.text().await.unwrap_or_default();
                    response.response_body = Some(truncate_string(&body, MAX_BODY_LENGTH));
                    if !status.is_success() {
                        tracing::warn!(phone = %phone, status = %status, "SMS gateway returned error");
                        failures.push(format!("{phone}: HTTP {status}"));
                    }
                }
                Err(e) => {
                    tracing::warn!(phone = %phone, error = %e, "SMS send failed");
                    failures.push(format!("{phone}: {e}"));
                }
            }
        }

        if !failures.is_empty() {
            response.error = Some(NotifyError::Other(format!(
                "{} of {} SMS deliveries failed: {}",
                failures.len(),
                self.phone_numbers.len(),
                failures.join("; ")
            )));
        }
        response
    }
}
