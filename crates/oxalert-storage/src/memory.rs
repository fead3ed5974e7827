use crate::error::{Result, StorageError};
use crate::{AlertHistoryStore, ChannelStore, NotificationLog, RuleStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxalert_common::types::{
    AlertInstance, AlertRule, AttemptOutcome, NewAlertInstance, NotificationAttempt,
    NotificationChannel, RuleChannelLink,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    rules: Vec<AlertRule>,
    links: Vec<RuleChannelLink>,
    channels: Vec<NotificationChannel>,
    instances: HashMap<String, AlertInstance>,
    /// rule_id -> id of its unresolved instance
    open_by_rule: HashMap<String, String>,
    attempts: Vec<NotificationAttempt>,
}

impl Inner {
    fn ensure_no_open(&self, rule_id: &str) -> Result<()> {
        match self.open_by_rule.get(rule_id) {
            Some(open) => Err(StorageError::Conflict {
                entity: "alert_instance",
                id: open.clone(),
                reason: format!("rule {rule_id} already has an unresolved instance"),
            }),
            None => Ok(()),
        }
    }

    fn insert_open(&mut self, new: NewAlertInstance) -> AlertInstance {
        let instance = new.into_instance(oxalert_common::id::next_id());
        self.open_by_rule
            .insert(instance.rule_id.clone(), instance.id.clone());
        self.instances.insert(instance.id.clone(), instance.clone());
        instance
    }
}

/// Process-local store; every operation runs under one mutex so
/// check-then-write sequences are atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces a rule in place, e.g. to simulate an administrative edit.
    pub fn update_rule(&self, rule: AlertRule) -> Result<()> {
        let mut inner = self.lock();
        let slot = inner
            .rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "alert_rule",
                id: rule.id.clone(),
            })?;
        *slot = rule;
        Ok(())
    }

    /// Enables or disables a channel record.
    pub fn set_channel_enabled(&self, channel_id: &str, enabled: bool) -> Result<()> {
        let mut inner = self.lock();
        let channel = inner
            .channels
            .iter_mut()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "notification_channel",
                id: channel_id.to_string(),
            })?;
        channel.enabled = enabled;
        channel.updated_at = Utc::now();
        Ok(())
    }

    /// Every instance ever opened for the rule, oldest first.
    pub fn instances_for_rule(&self, rule_id: &str) -> Vec<AlertInstance> {
        let inner = self.lock();
        let mut list: Vec<AlertInstance> = inner
            .instances
            .values()
            .filter(|i| i.rule_id == rule_id)
            .cloned()
            .collect();
        list.sort_by_key(|i| i.triggered_at);
        list
    }

    pub fn all_attempts(&self) -> Vec<NotificationAttempt> {
        self.lock().attempts.clone()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn insert_rule(&self, rule: &AlertRule) -> Result<AlertRule> {
        let mut inner = self.lock();
        if inner.rules.iter().any(|r| r.id == rule.id) {
            return Err(StorageError::Conflict {
                entity: "alert_rule",
                id: rule.id.clone(),
                reason: "duplicate id".to_string(),
            });
        }
        inner.rules.push(rule.clone());
        Ok(rule.clone())
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<AlertRule>> {
        Ok(self.lock().rules.iter().find(|r| r.id == rule_id).cloned())
    }

    async fn find_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>> {
        Ok(self.lock().rules.iter().find(|r| r.name == name).cloned())
    }

    async fn list_enabled_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self
            .lock()
            .rules
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn update_last_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        let rule = inner
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "alert_rule",
                id: rule_id.to_string(),
            })?;
        rule.last_triggered_at = Some(at);
        rule.trigger_count += 1;
        rule.updated_at = at;
        Ok(())
    }

    async fn link_channel(&self, rule_id: &str, channel_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let link = RuleChannelLink {
            rule_id: rule_id.to_string(),
            channel_id: channel_id.to_string(),
        };
        if !inner.links.contains(&link) {
            inner.links.push(link);
        }
        Ok(())
    }

    async fn linked_channel_ids(&self, rule_id: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .links
            .iter()
            .filter(|l| l.rule_id == rule_id)
            .map(|l| l.channel_id.clone())
            .collect())
    }
}

#[async_trait]
impl AlertHistoryStore for MemoryStore {
    async fn find_unresolved(&self, rule_id: &str) -> Result<Option<AlertInstance>> {
        let inner = self.lock();
        Ok(inner
            .open_by_rule
            .get(rule_id)
            .and_then(|id| inner.instances.get(id))
            .cloned())
    }

    async fn create_instance(&self, new: NewAlertInstance) -> Result<AlertInstance> {
        let mut inner = self.lock();
        inner.ensure_no_open(&new.rule_id)?;
        Ok(inner.insert_open(new))
    }

    async fn open_instance(&self, new: NewAlertInstance) -> Result<AlertInstance> {
        let mut inner = self.lock();
        inner.ensure_no_open(&new.rule_id)?;
        let at = new.triggered_at;
        let rule = inner
            .rules
            .iter_mut()
            .find(|r| r.id == new.rule_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "alert_rule",
                id: new.rule_id.clone(),
            })?;
        rule.last_triggered_at = Some(at);
        rule.trigger_count += 1;
        rule.updated_at = at;
        Ok(inner.insert_open(new))
    }

    async fn resolve_instance(
        &self,
        instance_id: &str,
        automatic: bool,
        at: DateTime<Utc>,
    ) -> Result<AlertInstance> {
        let mut inner = self.lock();
        let instance = inner
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "alert_instance",
                id: instance_id.to_string(),
            })?;
        if instance.resolved {
            return Err(StorageError::Conflict {
                entity: "alert_instance",
                id: instance_id.to_string(),
                reason: "already resolved".to_string(),
            });
        }
        instance.resolved = true;
        instance.resolved_at = Some(at);
        instance.resolved_automatically = automatic;
        let resolved = instance.clone();
        inner.open_by_rule.remove(&resolved.rule_id);
        Ok(resolved)
    }

    async fn acknowledge_instance(
        &self,
        instance_id: &str,
        user_id: &str,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<AlertInstance> {
        let mut inner = self.lock();
        let instance = inner
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "alert_instance",
                id: instance_id.to_string(),
            })?;
        instance.acknowledged = true;
        instance.acknowledged_by = Some(user_id.to_string());
        instance.acknowledged_at = Some(at);
        instance.acknowledge_note = note.map(str::to_string);
        Ok(instance.clone())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<AlertInstance>> {
        Ok(self.lock().instances.get(instance_id).cloned())
    }

    async fn list_unresolved(&self) -> Result<Vec<AlertInstance>> {
        let inner = self.lock();
        let mut open: Vec<AlertInstance> = inner
            .open_by_rule
            .values()
            .filter_map(|id| inner.instances.get(id))
            .cloned()
            .collect();
        open.sort_by_key(|i| i.triggered_at);
        Ok(open)
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn insert_channel(&self, channel: &NotificationChannel) -> Result<NotificationChannel> {
        let mut inner = self.lock();
        if inner
            .channels
            .iter()
            .any(|c| c.name == channel.name || c.id == channel.id)
        {
            return Err(StorageError::Conflict {
                entity: "notification_channel",
                id: channel.id.clone(),
                reason: format!("channel name '{}' or id already exists", channel.name),
            });
        }
        inner.channels.push(channel.clone());
        Ok(channel.clone())
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Option<NotificationChannel>> {
        Ok(self
            .lock()
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .cloned())
    }

    async fn find_channel_by_name(&self, name: &str) -> Result<Option<NotificationChannel>> {
        Ok(self
            .lock()
            .channels
            .iter()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn list_enabled_channels(&self) -> Result<Vec<NotificationChannel>> {
        Ok(self
            .lock()
            .channels
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationLog for MemoryStore {
    async fn record_attempt(&self, attempt: &NotificationAttempt) -> Result<()> {
        let mut inner = self.lock();
        if let Some(channel) = inner
            .channels
            .iter_mut()
            .find(|c| c.id == attempt.channel_id)
        {
            match attempt.outcome {
                AttemptOutcome::Sent => channel.success_count += 1,
                AttemptOutcome::Failed => channel.failure_count += 1,
            }
        }
        inner.attempts.push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(&self, instance_id: &str) -> Result<Vec<NotificationAttempt>> {
        Ok(self
            .lock()
            .attempts
            .iter()
            .filter(|a| a.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn cleanup_attempts(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock();
        let before = inner.attempts.len();
        inner.attempts.retain(|a| a.created_at >= older_than);
        Ok((before - inner.attempts.len()) as u64)
    }
}
