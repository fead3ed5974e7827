use crate::channels::{execute_json, require_http_url};
use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::SendResponse;
use base64::Engine;
use hmac::{Hmac, Mac};
use oxalert_common::types::AlertEvent;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Oxalert-Signature";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub secret: Option<String>,
}

fn parse_method(raw: Option<&str>) -> Result<Method> {
    match raw {
        None => Ok(Method::POST),
        Some(m) => Method::from_bytes(m.trim().to_uppercase().as_bytes())
            .map_err(|e| NotifyError::InvalidConfig(format!("Invalid HTTP method '{m}': {e}"))),
    }
}

fn parse_headers(raw: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in raw {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| NotifyError::InvalidConfig(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| NotifyError::InvalidConfig(format!("Invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

pub(crate) fn validate(cfg: &WebhookConfig) -> Result<()> {
    require_http_url("url", &cfg.url)?;
    parse_method(cfg.method.as_deref())?;
    parse_headers(&cfg.headers)?;
    Ok(())
}

/// HMAC-SHA256 of `body` keyed with `secret`, formatted as `sha256=<base64>`.
pub fn sign_body(secret: &str, body: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Other(format!("HMAC key rejected: {e}")))?;
    mac.update(body.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(format!(
        "sha256={}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    ))
}

/// Generic HTTP webhook carrying an `{alert, node}` JSON envelope.
pub struct WebhookAdapter {
    client: reqwest::Client,
    url: String,
    method: Method,
    headers: HeaderMap,
    secret: Option<String>,
}

impl WebhookAdapter {
    pub fn new(cfg: WebhookConfig, client: reqwest::Client) -> Result<Self> {
        require_http_url("url", &cfg.url)?;
        Ok(Self {
            client,
            method: parse_method(cfg.method.as_deref())?,
            headers: parse_headers(&cfg.headers)?,
            url: cfg.url,
            secret: cfg.secret.filter(|s| !s.is_empty()),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn envelope(event: &AlertEvent) -> Value {
        let inst = &event.instance;
        json!({
            "event": event.kind.as_str(),
            "alert": {
                "id": inst.id,
                "ruleId": inst.rule_id,
                "ruleName": event.rule.display_name(),
                "metric": inst.metric_name,
                "condition": inst.condition.as_str(),
                "threshold": inst.threshold,
                "value": event.value,
                "severity": inst.severity.as_str(),
                "message": event.message,
                "triggeredAt": inst.triggered_at.to_rfc3339(),
                "resolved": inst.resolved,
                "resolvedAt": inst.resolved_at.map(|t| t.to_rfc3339()),
                "acknowledged": inst.acknowledged,
            },
            "node": {
                "id": inst.node_id,
                "name": event.node_name,
            },
            "timestamp": event.timestamp.to_rfc3339(),
        })
    }

    pub async fn send(&self, event: &AlertEvent) -> SendResponse {
        let body = Self::envelope(event).to_string();
        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());

        if let Some(secret) = &self.secret {
            match sign_body(secret, &body) {
                Ok(signature) => request = request.header(SIGNATURE_HEADER, signature),
                Err(e) => {
                    return SendResponse::failed(
                        Some(truncate_string(&body, MAX_BODY_LENGTH)),
                        e,
                    )
                }
            }
        }
        execute_json("webhook", request, body).await
    }
}
