//! Seed-file import used by the `init-channels` and `init-rules` subcommands.
//!
//! Entries whose name already exists are skipped, so running an import twice
//! is harmless. Invalid entries are logged and skipped; the rest of the file
//! is still applied.

use anyhow::Context;
use chrono::Utc;
use oxalert_common::id::next_id;
use oxalert_common::types::{AlertRule, ChannelType, Condition, NotificationChannel, Severity};
use oxalert_notify::validate_channel_config;
use oxalert_storage::{ChannelStore, RuleStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSeedFile {
    #[serde(default)]
    pub channels: Vec<SeedChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedChannel {
    pub name: String,
    pub channel_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSeedFile {
    #[serde(default)]
    pub rules: Vec<SeedRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRule {
    pub name: String,
    pub node_id: String,
    pub metric_name: String,
    pub condition: String,
    pub threshold: f64,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Names of channels to link to the rule.
    #[serde(default)]
    pub channels: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_severity() -> String {
    "warning".to_string()
}

fn default_cooldown_minutes() -> u32 {
    5
}

/// Counts reported at the end of an import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: u32,
    pub skipped: u32,
    pub failed: u32,
    pub links: u32,
}

pub fn read_seed_file<T: DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", path, e))
}

fn build_channel(seed: &SeedChannel) -> anyhow::Result<NotificationChannel> {
    let channel_type: ChannelType = seed.channel_type.parse().map_err(anyhow::Error::msg)?;
    validate_channel_config(channel_type, &seed.config)?;
    let now = Utc::now();
    Ok(NotificationChannel {
        id: next_id(),
        name: seed.name.clone(),
        channel_type,
        config: seed.config.clone(),
        enabled: seed.enabled,
        success_count: 0,
        failure_count: 0,
        created_at: now,
        updated_at: now,
    })
}

pub async fn init_channels(
    store: &dyn ChannelStore,
    seed: &ChannelSeedFile,
) -> anyhow::Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for ch in &seed.channels {
        if store.find_channel_by_name(&ch.name).await?.is_some() {
            tracing::warn!(name = %ch.name, "Channel already exists, skipping");
            summary.skipped += 1;
            continue;
        }

        let channel = match build_channel(ch) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!(name = %ch.name, error = %e, "Invalid channel in seed file");
                summary.failed += 1;
                continue;
            }
        };

        match store.insert_channel(&channel).await {
            Ok(inserted) => {
                tracing::info!(
                    name = %inserted.name,
                    id = %inserted.id,
                    channel_type = %inserted.channel_type,
                    "Channel created"
                );
                summary.created += 1;
            }
            Err(e) => {
                tracing::error!(name = %ch.name, error = %e, "Failed to create channel");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        "init-channels completed"
    );
    Ok(summary)
}

fn build_rule(seed: &SeedRule) -> anyhow::Result<AlertRule> {
    let condition: Condition = seed.condition.parse().map_err(anyhow::Error::msg)?;
    let severity: Severity = seed.severity.parse().map_err(anyhow::Error::msg)?;
    let now = Utc::now();
    let rule = AlertRule {
        id: next_id(),
        name: seed.name.clone(),
        node_id: seed.node_id.clone(),
        metric_name: seed.metric_name.clone(),
        condition,
        threshold: seed.threshold,
        severity,
        enabled: seed.enabled,
        cooldown_minutes: seed.cooldown_minutes,
        last_triggered_at: None,
        trigger_count: 0,
        created_at: now,
        updated_at: now,
    };
    rule.validate().map_err(anyhow::Error::msg)?;
    Ok(rule)
}

pub async fn init_rules(
    rules: &dyn RuleStore,
    channels: &dyn ChannelStore,
    seed: &RuleSeedFile,
) -> anyhow::Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for r in &seed.rules {
        if !r.name.is_empty() && rules.find_rule_by_name(&r.name).await?.is_some() {
            tracing::warn!(name = %r.name, "Alert rule already exists, skipping");
            summary.skipped += 1;
            continue;
        }

        let rule = match build_rule(r) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::error!(name = %r.name, error = %e, "Invalid alert rule in seed file");
                summary.failed += 1;
                continue;
            }
        };

        let inserted = match rules.insert_rule(&rule).await {
            Ok(inserted) => inserted,
            Err(e) => {
                tracing::error!(name = %r.name, error = %e, "Failed to create alert rule");
                summary.failed += 1;
                continue;
            }
        };
        tracing::info!(name = %inserted.name, id = %inserted.id, "Alert rule created");
        summary.created += 1;

        for channel_name in &r.channels {
            let channel = channels
                .find_channel_by_name(channel_name)
                .await
                .with_context(|| format!("looking up channel '{channel_name}'"))?;
            let Some(channel) = channel else {
                tracing::warn!(
                    rule = %inserted.name,
                    channel = %channel_name,
                    "Linked channel not found, skipping link"
                );
                continue;
            };
            rules.link_channel(&inserted.id, &channel.id).await?;
            summary.links += 1;
        }
    }

    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        links = summary.links,
        "init-rules completed"
    );
    Ok(summary)
}
