use crate::error::{Result, StorageError};
use crate::{AlertHistoryStore, ChannelStore, NotificationLog, RuleStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxalert_common::types::{
    AlertInstance, AlertRule, AttemptOutcome, NewAlertInstance, NotificationAttempt,
    NotificationChannel,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    node_id TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    condition TEXT NOT NULL,
    threshold REAL NOT NULL,
    severity TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    cooldown_minutes INTEGER NOT NULL,
    last_triggered_at INTEGER,
    trigger_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rules_enabled ON alert_rules(enabled);

CREATE TABLE IF NOT EXISTS notification_channels (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    channel_type TEXT NOT NULL,
    config_json TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rule_channels (
    rule_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    PRIMARY KEY (rule_id, channel_id)
);

CREATE TABLE IF NOT EXISTS alert_instances (
    id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL,
    node_id TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    value REAL NOT NULL,
    threshold REAL NOT NULL,
    condition TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    triggered_at INTEGER NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0,
    acknowledged_by TEXT,
    acknowledged_at INTEGER,
    acknowledge_note TEXT,
    resolved INTEGER NOT NULL DEFAULT 0,
    resolved_at INTEGER,
    resolved_automatically INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_instances_one_open
    ON alert_instances(rule_id) WHERE resolved = 0;
CREATE INDEX IF NOT EXISTS idx_instances_rule ON alert_instances(rule_id, triggered_at);

CREATE TABLE IF NOT EXISTS notification_attempts (
    id TEXT PRIMARY KEY,
    instance_id TEXT NOT NULL,
    rule_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    event_kind TEXT NOT NULL,
    outcome TEXT NOT NULL,
    error TEXT,
    duration_ms INTEGER NOT NULL,
    request_body TEXT,
    http_status INTEGER,
    response_body TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attempts_instance ON notification_attempts(instance_id);
CREATE INDEX IF NOT EXISTS idx_attempts_time ON notification_attempts(created_at);
";

const RULE_COLUMNS: &str = "id, name, node_id, metric_name, condition, threshold, severity, enabled, \
     cooldown_minutes, last_triggered_at, trigger_count, created_at, updated_at";

const INSTANCE_COLUMNS: &str = "id, rule_id, node_id, metric_name, value, threshold, condition, \
     severity, message, triggered_at, acknowledged, acknowledged_by, acknowledged_at, \
     acknowledge_note, resolved, resolved_at, resolved_automatically";

const CHANNEL_COLUMNS: &str = "id, name, channel_type, config_json, enabled, success_count, \
     failure_count, created_at, updated_at";

const ATTEMPT_COLUMNS: &str = "id, instance_id, rule_id, channel_id, channel_type, event_kind, \
     outcome, error, duration_ms, request_body, http_status, response_body, created_at";

/// Store backed by a single SQLite database file (WAL mode).
///
/// The connection sits behind a mutex, so concurrent writers (the evaluator
/// resolving an instance while an operator acknowledges it) are serialized.
/// The partial unique index `idx_instances_one_open` is the last-resort guard
/// against two unresolved instances for one rule.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Other(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "Opened alert store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value).unwrap_or_default()
}

fn parse_col<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<AlertRule> {
    Ok(AlertRule {
        id: row.get(0)?,
        name: row.get(1)?,
        node_id: row.get(2)?,
        metric_name: row.get(3)?,
        condition: parse_col(4, row.get(4)?)?,
        threshold: row.get(5)?,
        severity: parse_col(6, row.get(6)?)?,
        enabled: row.get(7)?,
        cooldown_minutes: row.get(8)?,
        last_triggered_at: row.get::<_, Option<i64>>(9)?.map(from_ms),
        trigger_count: row.get::<_, i64>(10)?.max(0) as u64,
        created_at: from_ms(row.get(11)?),
        updated_at: from_ms(row.get(12)?),
    })
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<AlertInstance> {
    Ok(AlertInstance {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        node_id: row.get(2)?,
        metric_name: row.get(3)?,
        value: row.get(4)?,
        threshold: row.get(5)?,
        condition: parse_col(6, row.get(6)?)?,
        severity: parse_col(7, row.get(7)?)?,
        message: row.get(8)?,
        triggered_at: from_ms(row.get(9)?),
        acknowledged: row.get(10)?,
        acknowledged_by: row.get(11)?,
        acknowledged_at: row.get::<_, Option<i64>>(12)?.map(from_ms),
        acknowledge_note: row.get(13)?,
        resolved: row.get(14)?,
        resolved_at: row.get::<_, Option<i64>>(15)?.map(from_ms),
        resolved_automatically: row.get(16)?,
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationChannel> {
    let config_json: String = row.get(3)?;
    let config = serde_json::from_str(&config_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(NotificationChannel {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_type: parse_col(2, row.get(2)?)?,
        config,
        enabled: row.get(4)?,
        success_count: row.get::<_, i64>(5)?.max(0) as u64,
        failure_count: row.get::<_, i64>(6)?.max(0) as u64,
        created_at: from_ms(row.get(7)?),
        updated_at: from_ms(row.get(8)?),
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationAttempt> {
    Ok(NotificationAttempt {
        id: row.get(0)?,
        instance_id: row.get(1)?,
        rule_id: row.get(2)?,
        channel_id: row.get(3)?,
        channel_type: parse_col(4, row.get(4)?)?,
        event_kind: parse_col(5, row.get(5)?)?,
        outcome: parse_col(6, row.get(6)?)?,
        error: row.get(7)?,
        duration_ms: row.get(8)?,
        request_body: row.get(9)?,
        http_status: row.get::<_, Option<i64>>(10)?.map(|s| s as u16),
        response_body: row.get(11)?,
        created_at: from_ms(row.get(12)?),
    })
}

fn select_instance(conn: &Connection, instance_id: &str) -> Result<Option<AlertInstance>> {
    let sql = format!("SELECT {INSTANCE_COLUMNS} FROM alert_instances WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![instance_id], instance_from_row)
        .optional()?)
}

/// Inserts an unresolved instance. A second open instance for the same rule
/// is reported as a conflict naming the instance already open.
fn insert_instance(conn: &Connection, instance: &AlertInstance) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO alert_instances (id, rule_id, node_id, metric_name, value, threshold,
             condition, severity, message, triggered_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            instance.id,
            instance.rule_id,
            instance.node_id,
            instance.metric_name,
            instance.value,
            instance.threshold,
            instance.condition.as_str(),
            instance.severity.as_str(),
            instance.message,
            ms(instance.triggered_at),
        ],
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            let open: Option<String> = conn
                .query_row(
                    "SELECT id FROM alert_instances WHERE rule_id = ?1 AND resolved = 0",
                    params![instance.rule_id],
                    |row| row.get(0),
                )
                .optional()?;
            Err(StorageError::Conflict {
                entity: "alert_instance",
                id: open.unwrap_or_else(|| instance.id.clone()),
                reason: format!(
                    "rule {} already has an unresolved instance",
                    instance.rule_id
                ),
            })
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn insert_rule(&self, rule: &AlertRule) -> Result<AlertRule> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO alert_rules (id, name, node_id, metric_name, condition, threshold, severity,
                 enabled, cooldown_minutes, last_triggered_at, trigger_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                rule.id,
                rule.name,
                rule.node_id,
                rule.metric_name,
                rule.condition.as_str(),
                rule.threshold,
                rule.severity.as_str(),
                rule.enabled,
                rule.cooldown_minutes,
                rule.last_triggered_at.map(ms),
                rule.trigger_count as i64,
                ms(rule.created_at),
                ms(rule.updated_at),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict {
                    entity: "alert_rule",
                    id: rule.id.clone(),
                    reason: "duplicate id".to_string(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(rule.clone())
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<AlertRule>> {
        let conn = self.lock();
        let sql = format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![rule_id], rule_from_row)
            .optional()?)
    }

    async fn find_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>> {
        let conn = self.lock();
        let sql = format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE name = ?1 LIMIT 1");
        Ok(conn
            .query_row(&sql, params![name], rule_from_row)
            .optional()?)
    }

    async fn list_enabled_rules(&self) -> Result<Vec<AlertRule>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules WHERE enabled = 1 ORDER BY created_at ASC"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], rule_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn update_last_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE alert_rules
             SET last_triggered_at = ?2, trigger_count = trigger_count + 1, updated_at = ?2
             WHERE id = ?1",
            params![rule_id, ms(at)],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound {
                entity: "alert_rule",
                id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    async fn link_channel(&self, rule_id: &str, channel_id: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO rule_channels (rule_id, channel_id) VALUES (?1, ?2)",
            params![rule_id, channel_id],
        )?;
        Ok(())
    }

    async fn linked_channel_ids(&self, rule_id: &str) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT channel_id FROM rule_channels WHERE rule_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![rule_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[async_trait]
impl AlertHistoryStore for SqliteStore {
    async fn find_unresolved(&self, rule_id: &str) -> Result<Option<AlertInstance>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {INSTANCE_COLUMNS} FROM alert_instances WHERE rule_id = ?1 AND resolved = 0"
        );
        Ok(conn
            .query_row(&sql, params![rule_id], instance_from_row)
            .optional()?)
    }

    async fn create_instance(&self, new: NewAlertInstance) -> Result<AlertInstance> {
        let instance = new.into_instance(oxalert_common::id::next_id());
        let conn = self.lock();
        insert_instance(&conn, &instance)?;
        Ok(instance)
    }

    async fn open_instance(&self, new: NewAlertInstance) -> Result<AlertInstance> {
        let instance = new.into_instance(oxalert_common::id::next_id());
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        insert_instance(&tx, &instance)?;
        let updated = tx.execute(
            "UPDATE alert_rules
             SET last_triggered_at = ?2, trigger_count = trigger_count + 1, updated_at = ?2
             WHERE id = ?1",
            params![instance.rule_id, ms(instance.triggered_at)],
        )?;
        if updated == 0 {
            // Dropping the transaction rolls the insert back.
            return Err(StorageError::NotFound {
                entity: "alert_rule",
                id: instance.rule_id.clone(),
            });
        }
        tx.commit()?;
        Ok(instance)
    }

    async fn resolve_instance(
        &self,
        instance_id: &str,
        automatic: bool,
        at: DateTime<Utc>,
    ) -> Result<AlertInstance> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE alert_instances
             SET resolved = 1, resolved_at = ?2, resolved_automatically = ?3
             WHERE id = ?1 AND resolved = 0",
            params![instance_id, ms(at), automatic],
        )?;
        let current = select_instance(&conn, instance_id)?.ok_or_else(|| {
            StorageError::NotFound {
                entity: "alert_instance",
                id: instance_id.to_string(),
            }
        })?;
        if updated == 0 {
            return Err(StorageError::Conflict {
                entity: "alert_instance",
                id: instance_id.to_string(),
                reason: "already resolved".to_string(),
            });
        }
        Ok(current)
    }

    async fn acknowledge_instance(
        &self,
        instance_id: &str,
        user_id: &str,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<AlertInstance> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE alert_instances
             SET acknowledged = 1, acknowledged_by = ?2, acknowledged_at = ?3, acknowledge_note = ?4
             WHERE id = ?1",
            params![instance_id, user_id, ms(at), note],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound {
                entity: "alert_instance",
                id: instance_id.to_string(),
            });
        }
        select_instance(&conn, instance_id)?.ok_or_else(|| StorageError::NotFound {
            entity: "alert_instance",
            id: instance_id.to_string(),
        })
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<AlertInstance>> {
        let conn = self.lock();
        select_instance(&conn, instance_id)
    }

    async fn list_unresolved(&self) -> Result<Vec<AlertInstance>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {INSTANCE_COLUMNS} FROM alert_instances WHERE resolved = 0 ORDER BY triggered_at ASC"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], instance_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn insert_channel(&self, channel: &NotificationChannel) -> Result<NotificationChannel> {
        let config_json = serde_json::to_string(&channel.config)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO notification_channels (id, name, channel_type, config_json, enabled,
                 success_count, failure_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                channel.id,
                channel.name,
                channel.channel_type.as_str(),
                config_json,
                channel.enabled,
                channel.success_count as i64,
                channel.failure_count as i64,
                ms(channel.created_at),
                ms(channel.updated_at),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict {
                    entity: "notification_channel",
                    id: channel.id.clone(),
                    reason: format!("channel name '{}' or id already exists", channel.name),
                }
            } else {
                e.into()
            }
        })?;
        Ok(channel.clone())
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Option<NotificationChannel>> {
        let conn = self.lock();
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM notification_channels WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![channel_id], channel_from_row)
            .optional()?)
    }

    async fn find_channel_by_name(&self, name: &str) -> Result<Option<NotificationChannel>> {
        let conn = self.lock();
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM notification_channels WHERE name = ?1");
        Ok(conn
            .query_row(&sql, params![name], channel_from_row)
            .optional()?)
    }

    async fn list_enabled_channels(&self) -> Result<Vec<NotificationChannel>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM notification_channels WHERE enabled = 1 ORDER BY created_at ASC"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], channel_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[async_trait]
impl NotificationLog for SqliteStore {
    async fn record_attempt(&self, attempt: &NotificationAttempt) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO notification_attempts (id, instance_id, rule_id, channel_id, channel_type,
                 event_kind, outcome, error, duration_ms, request_body, http_status, response_body,
                 created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                attempt.id,
                attempt.instance_id,
                attempt.rule_id,
                attempt.channel_id,
                attempt.channel_type.as_str(),
                attempt.event_kind.as_str(),
                attempt.outcome.as_str(),
                attempt.error,
                attempt.duration_ms,
                attempt.request_body,
                attempt.http_status.map(i64::from),
                attempt.response_body,
                ms(attempt.created_at),
            ],
        )?;
        let counter_sql = match attempt.outcome {
            AttemptOutcome::Sent => {
                "UPDATE notification_channels SET success_count = success_count + 1 WHERE id = ?1"
            }
            AttemptOutcome::Failed => {
                "UPDATE notification_channels SET failure_count = failure_count + 1 WHERE id = ?1"
            }
        };
        tx.execute(counter_sql, params![attempt.channel_id])?;
        tx.commit()?;
        Ok(())
    }

    async fn list_attempts(&self, instance_id: &str) -> Result<Vec<NotificationAttempt>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM notification_attempts WHERE instance_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![instance_id], attempt_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn cleanup_attempts(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM notification_attempts WHERE created_at < ?1",
            params![ms(older_than)],
        )?;
        Ok(removed as u64)
    }
}
