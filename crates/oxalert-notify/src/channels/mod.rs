//! Channel adapters, one per [`ChannelType`].

pub mod chat;
pub mod email;
pub mod pagerduty;
pub mod sms;
pub mod webhook;

use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::SendResponse;
use oxalert_common::types::{AlertEvent, ChannelType, NotificationChannel, Severity};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;

use chat::{ChatAdapter, ChatKind};
use email::EmailAdapter;
use pagerduty::PagerDutyAdapter;
use sms::SmsAdapter;
use webhook::WebhookAdapter;

/// A ready-to-use delivery adapter built from a channel's stored config.
pub enum ChannelAdapter {
    Email(EmailAdapter),
    Slack(ChatAdapter),
    Discord(ChatAdapter),
    Teams(ChatAdapter),
    Webhook(WebhookAdapter),
    PagerDuty(PagerDutyAdapter),
    Sms(SmsAdapter),
}

impl ChannelAdapter {
    /// Validates the channel's config and builds its adapter. HTTP adapters
    /// share `client`.
    pub fn build(channel: &NotificationChannel, client: &reqwest::Client) -> Result<Self> {
        let config = &channel.config;
        let adapter = match channel.channel_type {
            ChannelType::Email => ChannelAdapter::Email(EmailAdapter::new(parse_config(
                channel.channel_type,
                config,
            )?)?),
            ChannelType::Slack => ChannelAdapter::Slack(ChatAdapter::new(
                ChatKind::Slack,
                parse_config(channel.channel_type, config)?,
                client.clone(),
            )?),
            ChannelType::Discord => ChannelAdapter::Discord(ChatAdapter::new(
                ChatKind::Discord,
                parse_config(channel.channel_type, config)?,
                client.clone(),
            )?),
            ChannelType::Teams => ChannelAdapter::Teams(ChatAdapter::new(
                ChatKind::Teams,
                parse_config(channel.channel_type, config)?,
                client.clone(),
            )?),
            ChannelType::Webhook => ChannelAdapter::Webhook(WebhookAdapter::new(
                parse_config(channel.channel_type, config)?,
                client.clone(),
            )?),
            ChannelType::PagerDuty => ChannelAdapter::PagerDuty(PagerDutyAdapter::new(
                parse_config(channel.channel_type, config)?,
                client.clone(),
            )?),
            ChannelType::Sms => ChannelAdapter::Sms(SmsAdapter::new(
                parse_config(channel.channel_type, config)?,
                client.clone(),
            )?),
        };
        Ok(adapter)
    }

    pub fn channel_type(&self) -> ChannelType {
        match self {
            ChannelAdapter::Email(_) => ChannelType::Email,
            ChannelAdapter::Slack(_) => ChannelType::Slack,
            ChannelAdapter::Discord(_) => ChannelType::Discord,
            ChannelAdapter::Teams(_) => ChannelType::Teams,
            ChannelAdapter::Webhook(_) => ChannelType::Webhook,
            ChannelAdapter::PagerDuty(_) => ChannelType::PagerDuty,
            ChannelAdapter::Sms(_) => ChannelType::Sms,
        }
    }

    /// Delivers the event once. Failures are reported in the response, never retried.
    pub async fn send(&self, event: &AlertEvent) -> SendResponse {
        match self {
            ChannelAdapter::Email(a) => a.send(event).await,
            ChannelAdapter::Slack(a) | ChannelAdapter::Discord(a) | ChannelAdapter::Teams(a) => {
                a.send(event).await
            }
            ChannelAdapter::Webhook(a) => a.send(event).await,
            ChannelAdapter::PagerDuty(a) => a.send(event).await,
            ChannelAdapter::Sms(a) => a.send(event).await,
        }
    }
}

/// Checks `config` against the schema of `channel_type` without building
/// anything that talks to the network. Run before a channel is persisted.
pub fn validate_channel_config(channel_type: ChannelType, config: &Value) -> Result<()> {
    match channel_type {
        ChannelType::Email => email::validate(&parse_config(channel_type, config)?),
        ChannelType::Slack | ChannelType::Discord | ChannelType::Teams => {
            chat::validate(&parse_config(channel_type, config)?)
        }
        ChannelType::Webhook => webhook::validate(&parse_config(channel_type, config)?),
        ChannelType::PagerDuty => pagerduty::validate(&parse_config(channel_type, config)?),
        ChannelType::Sms => sms::validate(&parse_config(channel_type, config)?),
    }
}

fn parse_config<T: DeserializeOwned>(channel_type: ChannelType, config: &Value) -> Result<T> {
    serde_json::from_value::<T>(config.clone())
        .map_err(|e| NotifyError::InvalidConfig(format!("Invalid {channel_type} config: {e}")))
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(NotifyError::InvalidConfig(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

pub(crate) fn require_http_url(field: &str, value: &str) -> Result<reqwest::Url> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| NotifyError::InvalidConfig(format!("{field} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(NotifyError::InvalidConfig(format!(
            "{field} must use http or https, got {other}"
        ))),
    }
}

/// Accent colour for chat payloads; resolution events are always green.
pub(crate) fn severity_colour(severity: Severity, resolved: bool) -> u32 {
    if resolved {
        return 0x2E7D32;
    }
    match severity {
        Severity::Critical => 0xD32F2F,
        Severity::Warning => 0xFFA000,
        Severity::Info => 0x1976D2,
    }
}

/// Sends a prepared JSON request and captures status and body.
///
/// Non-2xx responses are reported as [`NotifyError::Api`].
pub(crate) async fn execute_json(
    service: &str,
    request: reqwest::RequestBuilder,
    body: String,
) -> SendResponse {
    let mut response = SendResponse {
        request_body: Some(truncate_string(&body, MAX_BODY_LENGTH)),
        ..Default::default()
    };

    match request
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
    {
        Ok(resp) => {
            let status = resp.status();
            response.http_status = Some(status.as_u16());
            let resp_body = match resp.text().await {
                Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
                Err(e) => format!("[Failed to read response body: {e}]"),
            };
            if !status.is_success() {
                tracing::warn!(service, status = %status, "Channel endpoint returned non-success status");
                response.error = Some(NotifyError::Api {
                    service: service.to_string(),
                    status: status.as_u16(),
                    body: resp_body.clone(),
                });
            }
            response.response_body = Some(resp_body);
        }
        Err(e) => {
            tracing::warn!(service, error = %e, "Channel request failed");
            response.error = Some(NotifyError::Http(e));
        }
    }
    response
}
