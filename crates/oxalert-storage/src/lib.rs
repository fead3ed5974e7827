//! Persistence contracts consumed by the alert engine.
//!
//! The engine never talks to a database directly; it reads rules, tracks
//! alert instances and appends delivery attempts through the traits below.
//! Two implementations ship with the crate: [`memory::MemoryStore`] for
//! embedding and tests, and [`sqlite::SqliteStore`] backed by a single
//! SQLite file. Both enforce that a rule never has more than one
//! unresolved instance.

pub mod error;
pub mod memory;
pub mod sqlite;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxalert_common::types::{
    AlertInstance, AlertRule, NewAlertInstance, NotificationAttempt, NotificationChannel,
};

pub use error::{Result, StorageError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Alert rules and their channel links.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Persists a new rule. Callers validate the rule beforehand.
    async fn insert_rule(&self, rule: &AlertRule) -> Result<AlertRule>;

    async fn get_rule(&self, rule_id: &str) -> Result<Option<AlertRule>>;

    async fn find_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>>;

    /// Returns every enabled rule, oldest first.
    async fn list_enabled_rules(&self) -> Result<Vec<AlertRule>>;

    /// Records a trigger: sets `last_triggered_at` and bumps `trigger_count`.
    async fn update_last_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Links a channel to a rule. Linking twice is a no-op.
    async fn link_channel(&self, rule_id: &str, channel_id: &str) -> Result<()>;

    /// Channel ids linked to the rule, in link order.
    async fn linked_channel_ids(&self, rule_id: &str) -> Result<Vec<String>>;
}

/// Alert instance lifecycle.
#[async_trait]
pub trait AlertHistoryStore: Send + Sync {
    /// The rule's single unresolved instance, if any.
    async fn find_unresolved(&self, rule_id: &str) -> Result<Option<AlertInstance>>;

    /// Opens a new instance.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the rule already has an
    /// unresolved instance.
    async fn create_instance(&self, new: NewAlertInstance) -> Result<AlertInstance>;

    /// Opens a new instance and records the trigger on its rule in one write:
    /// the rule's `last_triggered_at` becomes `new.triggered_at` and its
    /// `trigger_count` is incremented. Either both happen or neither does.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] when the rule already has an unresolved
    /// instance, [`StorageError::NotFound`] when the rule does not exist.
    async fn open_instance(&self, new: NewAlertInstance) -> Result<AlertInstance>;

    /// Marks an instance resolved. Resolving twice is a conflict.
    async fn resolve_instance(
        &self,
        instance_id: &str,
        automatic: bool,
        at: DateTime<Utc>,
    ) -> Result<AlertInstance>;

    /// Annotates an instance as seen by `user_id`. Leaves resolution untouched.
    async fn acknowledge_instance(
        &self,
        instance_id: &str,
        user_id: &str,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<AlertInstance>;

    async fn get_instance(&self, instance_id: &str) -> Result<Option<AlertInstance>>;

    async fn list_unresolved(&self) -> Result<Vec<AlertInstance>>;
}

/// Notification channel records.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Persists a channel. Names are unique.
    async fn insert_channel(&self, channel: &NotificationChannel) -> Result<NotificationChannel>;

    async fn get_channel(&self, channel_id: &str) -> Result<Option<NotificationChannel>>;

    async fn find_channel_by_name(&self, name: &str) -> Result<Option<NotificationChannel>>;

    async fn list_enabled_channels(&self) -> Result<Vec<NotificationChannel>>;
}

/// Append-only delivery log.
#[async_trait]
pub trait NotificationLog: Send + Sync {
    /// Appends the attempt and bumps the channel's success or failure counter.
    async fn record_attempt(&self, attempt: &NotificationAttempt) -> Result<()>;

    async fn list_attempts(&self, instance_id: &str) -> Result<Vec<NotificationAttempt>>;

    /// Deletes attempts created before `older_than`. Returns the number removed.
    async fn cleanup_attempts(&self, older_than: DateTime<Utc>) -> Result<u64>;
}
