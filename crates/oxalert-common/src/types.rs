use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use oxalert_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert_eq!(sev.to_string(), "warning");
/// assert!(Severity::Critical > Severity::Info);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "critical" | "crit" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Comparator applied between the observed value and a rule's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Above,
    Below,
    Equals,
    #[serde(alias = "not-equals")]
    NotEquals,
}

impl Condition {
    /// Storage representation (`"not_equals"` rather than the display form).
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Above => "above",
            Condition::Below => "below",
            Condition::Equals => "equals",
            Condition::NotEquals => "not_equals",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::NotEquals => f.write_str("not-equals"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::str::FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" | "gt" | ">" => Ok(Condition::Above),
            "below" | "lt" | "<" => Ok(Condition::Below),
            "equals" | "eq" | "==" => Ok(Condition::Equals),
            "not_equals" | "not-equals" | "ne" | "!=" => Ok(Condition::NotEquals),
            _ => Err(format!("unknown condition: {s}")),
        }
    }
}

/// A standing threshold rule evaluated on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    /// Display name used in notification titles; may be empty.
    pub name: String,
    pub node_id: String,
    pub metric_name: String,
    pub condition: Condition,
    pub threshold: f64,
    pub severity: Severity,
    pub enabled: bool,
    pub cooldown_minutes: u32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub trigger_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    /// Name shown to humans: the rule name, or the metric when unnamed.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.metric_name
        } else {
            &self.name
        }
    }

    /// Checks the invariants a rule must satisfy before it is persisted.
    pub fn validate(&self) -> Result<(), String> {
        if self.node_id.trim().is_empty() {
            return Err("node_id must not be empty".to_string());
        }
        if self.metric_name.trim().is_empty() {
            return Err("metric_name must not be empty".to_string());
        }
        if !self.threshold.is_finite() {
            return Err(format!("threshold must be finite, got {}", self.threshold));
        }
        if self.cooldown_minutes < 1 {
            return Err("cooldown_minutes must be at least 1".to_string());
        }
        Ok(())
    }
}

/// One episode of a rule being in breach, from trigger to resolution.
///
/// `acknowledged` and `resolved` are independent: an instance may be
/// acknowledged and still open, or resolved without ever being acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInstance {
    pub id: String,
    pub rule_id: String,
    pub node_id: String,
    pub metric_name: String,
    pub value: f64,
    pub threshold: f64,
    pub condition: Condition,
    pub severity: Severity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledge_note: Option<String>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_automatically: bool,
}

/// Fields supplied by the evaluator when opening a new instance.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlertInstance {
    pub rule_id: String,
    pub node_id: String,
    pub metric_name: String,
    pub value: f64,
    pub threshold: f64,
    pub condition: Condition,
    pub severity: Severity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

impl NewAlertInstance {
    pub fn into_instance(self, id: String) -> AlertInstance {
        AlertInstance {
            id,
            rule_id: self.rule_id,
            node_id: self.node_id,
            metric_name: self.metric_name,
            value: self.value,
            threshold: self.threshold,
            condition: self.condition,
            severity: self.severity,
            message: self.message,
            triggered_at: self.triggered_at,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            acknowledge_note: None,
            resolved: false,
            resolved_at: None,
            resolved_automatically: false,
        }
    }
}

/// Supported notification channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Slack,
    Discord,
    Webhook,
    Teams,
    #[serde(alias = "pager_duty")]
    PagerDuty,
    Sms,
}

impl ChannelType {
    pub const ALL: [ChannelType; 7] = [
        ChannelType::Email,
        ChannelType::Slack,
        ChannelType::Discord,
        ChannelType::Webhook,
        ChannelType::Teams,
        ChannelType::PagerDuty,
        ChannelType::Sms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Slack => "slack",
            ChannelType::Discord => "discord",
            ChannelType::Webhook => "webhook",
            ChannelType::Teams => "teams",
            ChannelType::PagerDuty => "pagerduty",
            ChannelType::Sms => "sms",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        ChannelType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown channel type: {s}"))
    }
}

/// A configured notification destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub channel_type: ChannelType,
    /// Type-specific settings, validated against the type's schema.
    pub config: serde_json::Value,
    pub enabled: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleChannelLink {
    pub rule_id: String,
    pub channel_id: String,
}

/// Whether an event opens or closes an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Trigger,
    Resolve,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Trigger => "trigger",
            EventKind::Resolve => "resolve",
        }
    }

    pub fn is_resolve(&self) -> bool {
        matches!(self, EventKind::Resolve)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trigger" => Ok(EventKind::Trigger),
            "resolve" => Ok(EventKind::Resolve),
            _ => Err(format!("unknown event kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Sent,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Sent => "sent",
            AttemptOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(AttemptOutcome::Sent),
            "failed" => Ok(AttemptOutcome::Failed),
            _ => Err(format!("unknown attempt outcome: {s}")),
        }
    }
}

/// Append-only record of one (instance, channel) delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub id: String,
    pub instance_id: String,
    pub rule_id: String,
    pub channel_id: String,
    pub channel_type: ChannelType,
    pub event_kind: EventKind,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub request_body: Option<String>,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The unit handed to the dispatcher: one instance opening or closing.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub kind: EventKind,
    pub rule: AlertRule,
    pub instance: AlertInstance,
    /// Human-readable node label, falling back to the node id.
    pub node_name: String,
    /// Trigger message for trigger events, recovery text for resolve events.
    pub message: String,
    /// Value observed on the tick that produced this event.
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn is_resolved(&self) -> bool {
        self.kind.is_resolve()
    }

    /// Short title shared by chat, email and paging payloads.
    pub fn title(&self) -> String {
        let tag = if self.is_resolved() { "[RESOLVED]" } else { "" };
        format!(
            "[oxalert][{}]{} {} - {}",
            self.instance.severity,
            tag,
            self.rule.display_name(),
            self.node_name
        )
    }
}
