use crate::condition::satisfied;
use crate::cooldown;
use crate::error::{AlertError, Result};
use crate::MetricsProvider;
use chrono::{DateTime, Utc};
use oxalert_common::types::{AlertEvent, AlertInstance, AlertRule, EventKind, NewAlertInstance};
use oxalert_notify::{ChannelOutcome, NotificationDispatcher};
use oxalert_storage::{AlertHistoryStore, RuleStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Tuning knobs fixed at construction time.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Trailing window the metrics provider aggregates over.
    pub window_minutes: u32,
    pub metric_timeout: Duration,
    /// Rules evaluated concurrently within one tick.
    pub max_concurrent: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            metric_timeout: Duration::from_secs(5),
            max_concurrent: 8,
        }
    }
}

/// What happened to one rule during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// A new instance was opened and a trigger event dispatched.
    Triggered { instance_id: String },
    /// The open instance was auto-resolved and a resolve event dispatched.
    Resolved { instance_id: String },
    /// Still breaching, but an instance is already open.
    Suppressed { instance_id: String },
    /// Breaching with no open instance, but the cooldown has not elapsed.
    CoolingDown,
    /// Not breaching and nothing open.
    Quiet,
    /// No usable value this tick; nothing was changed.
    Skipped { reason: String },
    /// A storage failure stopped this rule's evaluation.
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct RuleReport {
    pub rule_id: String,
    pub outcome: RuleOutcome,
    /// Per-channel results when an event was dispatched.
    pub dispatch: Vec<ChannelOutcome>,
}

/// Summary of one evaluation pass.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub rules: Vec<RuleReport>,
}

impl TickReport {
    pub fn rule(&self, rule_id: &str) -> Option<&RuleReport> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    pub fn triggered(&self) -> usize {
        self.count(|o| matches!(o, RuleOutcome::Triggered { .. }))
    }

    pub fn resolved(&self) -> usize {
        self.count(|o| matches!(o, RuleOutcome::Resolved { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RuleOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&RuleOutcome) -> bool) -> usize {
        self.rules.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Evaluates every enabled rule once per tick.
///
/// The check-then-act sequence for a rule (look up the open instance, then
/// create or resolve) runs under a per-rule async mutex, and the history
/// store rejects a second open instance for the same rule, so concurrent
/// ticks cannot double-open. Opening an instance and recording the rule's
/// trigger is a single store write; if it fails nothing is dispatched.
pub struct AlertEvaluator {
    rules: Arc<dyn RuleStore>,
    history: Arc<dyn AlertHistoryStore>,
    metrics: Arc<dyn MetricsProvider>,
    dispatcher: Arc<NotificationDispatcher>,
    config: EvaluatorConfig,
    rule_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AlertEvaluator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        history: Arc<dyn AlertHistoryStore>,
        metrics: Arc<dyn MetricsProvider>,
        dispatcher: Arc<NotificationDispatcher>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            rules,
            history,
            metrics,
            dispatcher,
            config,
            rule_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Runs one pass at the current time, logging instead of failing.
    pub async fn run_tick(self: &Arc<Self>) -> Option<TickReport> {
        match self.evaluate_at(Utc::now()).await {
            Ok(report) => {
                tracing::info!(
                    rules = report.rules.len(),
                    triggered = report.triggered(),
                    resolved = report.resolved(),
                    failed = report.failed(),
                    "Alert evaluation tick finished"
                );
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Alert evaluation tick failed");
                None
            }
        }
    }

    /// Evaluates every enabled rule as of `now`.
    ///
    /// Only a failure to list rules fails the whole pass; anything that goes
    /// wrong for a single rule is contained in that rule's report.
    pub async fn evaluate_at(self: &Arc<Self>, now: DateTime<Utc>) -> Result<TickReport> {
        let rules = self.rules.list_enabled_rules().await?;
        self.prune_locks(&rules);

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(rules.len());

        for rule in rules {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(error = %e, "Evaluation semaphore closed");
                    break;
                }
            };
            let this = Arc::clone(self);
            let rule_id = rule.id.clone();
            let handle = tokio::spawn(async move {
                let report = this.evaluate_rule(rule, now).await;
                drop(permit);
                report
            });
            handles.push((rule_id, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (rule_id, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(rule_id = %rule_id, error = %e, "Rule evaluation task panicked");
                    reports.push(RuleReport {
                        rule_id,
                        outcome: RuleOutcome::Failed {
                            error: e.to_string(),
                        },
                        dispatch: Vec::new(),
                    });
                }
            }
        }

        Ok(TickReport {
            started_at: now,
            rules: reports,
        })
    }

    fn rule_lock(&self, rule_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .rule_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(rule_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops locks of rules that are no longer enabled.
    fn prune_locks(&self, rules: &[AlertRule]) {
        let live: HashSet<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        let mut locks = self
            .rule_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|id, _| live.contains(id.as_str()));
    }

    async fn evaluate_rule(&self, rule: AlertRule, now: DateTime<Utc>) -> RuleReport {
        let lock = self.rule_lock(&rule.id);
        let _guard = lock.lock().await;

        let rule_id = rule.id.clone();
        match self.check_rule(rule, now).await {
            Ok((outcome, dispatch)) => RuleReport {
                rule_id,
                outcome,
                dispatch,
            },
            Err(e) => {
                tracing::error!(rule_id = %rule_id, error = %e, "Rule evaluation failed");
                RuleReport {
                    rule_id,
                    outcome: RuleOutcome::Failed {
                        error: e.to_string(),
                    },
                    dispatch: Vec::new(),
                }
            }
        }
    }

    async fn check_rule(
        &self,
        rule: AlertRule,
        now: DateTime<Utc>,
    ) -> Result<(RuleOutcome, Vec<ChannelOutcome>)> {
        let value = match self.fetch_value(&rule).await {
            Ok(Some(v)) if v.is_finite() => v,
            Ok(Some(v)) => {
                tracing::warn!(rule_id = %rule.id, node_id = %rule.node_id, value = v, "Non-finite metric value, skipping rule");
                return Ok((skipped("non-finite value"), Vec::new()));
            }
            Ok(None) => {
                tracing::debug!(
                    rule_id = %rule.id,
                    node_id = %rule.node_id,
                    metric = %rule.metric_name,
                    "No metric data, skipping rule"
                );
                return Ok((skipped("no data"), Vec::new()));
            }
            Err(e) => {
                tracing::warn!(rule_id = %rule.id, node_id = %rule.node_id, error = %e, "Metric fetch failed, skipping rule");
                return Ok((skipped(&e.to_string()), Vec::new()));
            }
        };

        let triggered = satisfied(value, rule.condition, rule.threshold);
        let open = self.history.find_unresolved(&rule.id).await?;

        match (triggered, open) {
            (true, Some(instance)) => {
                tracing::debug!(rule_id = %rule.id, instance_id = %instance.id, "Alert already open");
                Ok((
                    RuleOutcome::Suppressed {
                        instance_id: instance.id,
                    },
                    Vec::new(),
                ))
            }
            (true, None) => {
                if !cooldown::permitted(rule.last_triggered_at, rule.cooldown_minutes, now) {
                    tracing::debug!(rule_id = %rule.id, "Alert suppressed (cooldown)");
                    return Ok((RuleOutcome::CoolingDown, Vec::new()));
                }
                self.trigger(rule, value, now).await
            }
            (false, Some(instance)) => self.resolve(rule, instance, value, now).await,
            (false, None) => Ok((RuleOutcome::Quiet, Vec::new())),
        }
    }

    async fn fetch_value(&self, rule: &AlertRule) -> Result<Option<f64>> {
        let fetch = self.metrics.get_value(
            &rule.node_id,
            &rule.metric_name,
            self.config.window_minutes,
        );
        match tokio::time::timeout(self.config.metric_timeout, fetch).await {
            Ok(result) => result.map_err(|e| AlertError::MetricProvider(format!("{e:#}"))),
            Err(_) => Err(AlertError::MetricTimeout {
                node_id: rule.node_id.clone(),
                metric_name: rule.metric_name.clone(),
                after_ms: self.config.metric_timeout.as_millis() as u64,
            }),
        }
    }

    /// Node label for notification text; falls back to the node id.
    async fn node_name(&self, node_id: &str) -> String {
        match tokio::time::timeout(self.config.metric_timeout, self.metrics.node_name(node_id))
            .await
        {
            Ok(Ok(Some(name))) if !name.is_empty() => name,
            Ok(Ok(_)) => node_id.to_string(),
            Ok(Err(e)) => {
                tracing::debug!(node_id, error = %e, "Node name lookup failed");
                node_id.to_string()
            }
            Err(_) => {
                tracing::debug!(node_id, "Node name lookup timed out");
                node_id.to_string()
            }
        }
    }

    async fn trigger(
        &self,
        mut rule: AlertRule,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<(RuleOutcome, Vec<ChannelOutcome>)> {
        let node_name = self.node_name(&rule.node_id).await;
        let message = trigger_message(&rule, &node_name, value);

        let new = NewAlertInstance {
            rule_id: rule.id.clone(),
            node_id: rule.node_id.clone(),
            metric_name: rule.metric_name.clone(),
            value,
            threshold: rule.threshold,
            condition: rule.condition,
            severity: rule.severity,
            message: message.clone(),
            triggered_at: now,
        };
        let instance = match self.history.open_instance(new).await {
            Ok(instance) => instance,
            Err(e) if e.is_conflict() => {
                // Another writer opened one between lookup and insert.
                tracing::warn!(rule_id = %rule.id, error = %e, "Alert instance already open");
                let open = self.history.find_unresolved(&rule.id).await?;
                return Ok((
                    RuleOutcome::Suppressed {
                        instance_id: open.map(|i| i.id).unwrap_or_default(),
                    },
                    Vec::new(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        rule.last_triggered_at = Some(now);
        rule.trigger_count += 1;

        tracing::warn!(
            rule_id = %rule.id,
            instance_id = %instance.id,
            node_id = %rule.node_id,
            metric = %rule.metric_name,
            value,
            severity = %rule.severity,
            "Alert triggered"
        );

        let instance_id = instance.id.clone();
        let event = AlertEvent {
            kind: EventKind::Trigger,
            rule,
            instance,
            node_name,
            message,
            value,
            timestamp: now,
        };
        let dispatch = self.dispatch(&event).await;
        Ok((RuleOutcome::Triggered { instance_id }, dispatch))
    }

    async fn resolve(
        &self,
        rule: AlertRule,
        open: AlertInstance,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<(RuleOutcome, Vec<ChannelOutcome>)> {
        let instance = match self.history.resolve_instance(&open.id, true, now).await {
            Ok(instance) => instance,
            Err(e) if e.is_conflict() => {
                tracing::debug!(rule_id = %rule.id, instance_id = %open.id, "Instance already resolved");
                return Ok((RuleOutcome::Quiet, Vec::new()));
            }
            Err(e) => return Err(e.into()),
        };

        let node_name = self.node_name(&rule.node_id).await;
        let message = resolve_message(&rule, &node_name, value);
        tracing::info!(
            rule_id = %rule.id,
            instance_id = %instance.id,
            node_id = %rule.node_id,
            value,
            "Alert resolved"
        );

        let instance_id = instance.id.clone();
        let event = AlertEvent {
            kind: EventKind::Resolve,
            rule,
            instance,
            node_name,
            message,
            value,
            timestamp: now,
        };
        let dispatch = self.dispatch(&event).await;
        Ok((RuleOutcome::Resolved { instance_id }, dispatch))
    }

    async fn dispatch(&self, event: &AlertEvent) -> Vec<ChannelOutcome> {
        let channel_ids = match self.rules.linked_channel_ids(&event.rule.id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(rule_id = %event.rule.id, error = %e, "Failed to load linked channels");
                return Vec::new();
            }
        };
        if channel_ids.is_empty() {
            tracing::debug!(rule_id = %event.rule.id, "No channels linked to rule");
            return Vec::new();
        }
        self.dispatcher.dispatch(event, &channel_ids).await
    }
}

fn skipped(reason: &str) -> RuleOutcome {
    RuleOutcome::Skipped {
        reason: reason.to_string(),
    }
}

/// `"<metric> on <node> is <condition> threshold: <value> (threshold: <condition> <threshold>)"`
pub fn trigger_message(rule: &AlertRule, node_name: &str, value: f64) -> String {
    format!(
        "{metric} on {node} is {cond} threshold: {value:.2} (threshold: {cond} {threshold:.2})",
        metric = rule.metric_name,
        node = node_name,
        cond = rule.condition,
        threshold = rule.threshold,
    )
}

pub fn resolve_message(rule: &AlertRule, node_name: &str, value: f64) -> String {
    format!(
        "{metric} on {node} recovered: {value:.2} (threshold: {cond} {threshold:.2})",
        metric = rule.metric_name,
        node = node_name,
        cond = rule.condition,
        threshold = rule.threshold,
    )
}
