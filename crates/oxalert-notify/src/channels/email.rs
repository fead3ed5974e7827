use crate::channels::require_non_empty;
use crate::error::{NotifyError, Result};
use crate::utils::{escape_html, truncate_string, MAX_BODY_LENGTH};
use crate::SendResponse;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use oxalert_common::types::AlertEvent;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EmailAuth {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub host: String,
    /// Defaults to 465 when `secure`, 587 otherwise.
    pub port: Option<u16>,
    /// Implicit TLS when true, STARTTLS otherwise.
    #[serde(default)]
    pub secure: bool,
    pub auth: Option<EmailAuth>,
    pub from: String,
    pub to: Vec<String>,
}

impl EmailConfig {
    fn resolved_port(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 465 } else { 587 })
    }
}

fn parse_mailbox(field: &str, raw: &str) -> Result<Mailbox> {
    raw.parse::<Mailbox>()
        .map_err(|e| NotifyError::InvalidConfig(format!("{field} '{raw}' is not a valid address: {e}")))
}

pub(crate) fn validate(cfg: &EmailConfig) -> Result<()> {
    require_non_empty("host", &cfg.host)?;
    parse_mailbox("from", &cfg.from)?;
    if cfg.to.is_empty() {
        return Err(NotifyError::InvalidConfig(
            "to must list at least one recipient".to_string(),
        ));
    }
    for recipient in &cfg.to {
        parse_mailbox("to", recipient)?;
    }
    Ok(())
}

/// SMTP delivery: one multipart (plain + HTML) message addressed to every recipient.
pub struct EmailAdapter {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailAdapter {
    pub fn new(cfg: EmailConfig) -> Result<Self> {
        validate(&cfg)?;
        let builder = if cfg.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
        }
        .map_err(|e| NotifyError::InvalidConfig(format!("Invalid SMTP host {}: {e}", cfg.host)))?;

        let mut builder = builder.port(cfg.resolved_port());
        if let Some(auth) = &cfg.auth {
            builder = builder.credentials(Credentials::new(auth.user.clone(), auth.pass.clone()));
        }

        let to = cfg
            .to
            .iter()
            .map(|r| parse_mailbox("to", r))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            transport: builder.build(),
            from: parse_mailbox("from", &cfg.from)?,
            to,
        })
    }

    pub fn recipients(&self) -> &[Mailbox] {
        &self.to
    }

    pub fn format_plain(event: &AlertEvent) -> String {
        let inst = &event.instance;
        let status_line = if event.is_resolved() {
            "Status: RESOLVED\n"
        } else {
            ""
        };
        format!(
            "Alert: {severity}\n{status_line}Rule: {rule}\nNode: {node} ({node_id})\nMetric: {metric}\nCondition: {condition} {threshold:.2}\nValue: {value:.2}\nMessage: {message}\nTime: {time}",
            severity = inst.severity,
            rule = event.rule.display_name(),
            node = event.node_name,
            node_id = inst.node_id,
            metric = inst.metric_name,
            condition = inst.condition,
            threshold = inst.threshold,
            value = event.value,
            message = event.message,
            time = event.timestamp.to_rfc3339(),
        )
    }

    pub fn format_html(event: &AlertEvent) -> String {
        let inst = &event.instance;
        let colour = super::severity_colour(inst.severity, event.is_resolved());
        let rows = [
            ("Severity", inst.severity.to_string()),
            ("Rule", event.rule.display_name().to_string()),
            ("Node", format!("{} ({})", event.node_name, inst.node_id)),
            ("Metric", inst.metric_name.clone()),
            (
                "Condition",
                format!("{} {:.2}", inst.condition, inst.threshold),
            ),
            ("Value", format!("{:.2}", event.value)),
            ("Time", event.timestamp.to_rfc3339()),
        ];
        let mut table = String::new();
        for (label, value) in rows {
            table.push_str(&format!(
                "<tr><th align=\"left\">{label}</th><td>{}</td></tr>",
                escape_html(&value)
            ));
        }
        format!(
            "<html><body>\
             <h2 style=\"color:#{colour:06X}\">{title}</h2>\
             <p>{message}</p>\
             <table cellpadding=\"4\">{table}</table>\
             </body></html>",
            title = escape_html(&event.title()),
            message = escape_html(&event.message),
        )
    }

    fn build_message(&self, subject: &str, plain: String, html: String) -> Result<Message> {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder
            .multipart(MultiPart::alternative_plain_html(plain, html))
            .map_err(|e| NotifyError::Smtp(e.to_string()))
    }

    pub async fn send(&self, event: &AlertEvent) -> SendResponse {
        let subject = event.title();
        let plain = Self::format_plain(event);
        let html = Self::format_html(event);

        let request_body = serde_json::json!({
            "from": self.from.to_string(),
            "to": self.to.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "subject": subject,
            "body": plain,
        });
        let request_body = Some(truncate_string(
            &request_body.to_string(),
            MAX_BODY_LENGTH,
        ));

        let message = match self.build_message(&subject, plain, html) {
            Ok(m) => m,
            Err(e) => return SendResponse::failed(request_body, e),
        };

        match self.transport.send(message).await {
            Ok(resp) => SendResponse {
                request_body,
                response_body: Some(truncate_string(
                    &format!("{} {}", resp.code(), resp.message().collect::<Vec<_>>().join(" ")),
                    MAX_BODY_LENGTH,
                )),
                ..Default::default()
            },
            Err(e) => {
                tracing::warn!(error = %e, "Email send failed");
                SendResponse::failed(request_body, NotifyError::Smtp(e.to_string()))
            }
        }
    }
}
