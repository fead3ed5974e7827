use crate::condition::satisfied;
use crate::cooldown::permitted;
use crate::evaluator::{AlertEvaluator, EvaluatorConfig, RuleOutcome};
use crate::scheduler::AlertScheduler;
use crate::MetricsProvider;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use oxalert_common::types::{
    AlertInstance, AlertRule, AttemptOutcome, ChannelType, Condition, EventKind,
    NewAlertInstance, NotificationChannel, Severity,
};
use oxalert_notify::{ChannelRegistry, NotificationDispatcher};
use oxalert_storage::{
    AlertHistoryStore, ChannelStore, MemoryStore, NotificationLog, RuleStore, StorageError,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test doubles ──

#[derive(Default)]
struct ScriptedMetrics {
    values: Mutex<HashMap<(String, String), Option<f64>>>,
    names: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedMetrics {
    fn set(&self, node: &str, metric: &str, value: Option<f64>) {
        self.values
            .lock()
            .unwrap()
            .insert((node.to_string(), metric.to_string()), value);
    }

    fn name_node(&self, node: &str, name: &str) {
        self.names
            .lock()
            .unwrap()
            .insert(node.to_string(), name.to_string());
    }

    fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    fn delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl MetricsProvider for ScriptedMetrics {
    async fn get_value(
        &self,
        node_id: &str,
        metric_name: &str,
        _window_minutes: u32,
    ) -> anyhow::Result<Option<f64>> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock().unwrap() {
            anyhow::bail!("metrics backend unavailable");
        }
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(&(node_id.to_string(), metric_name.to_string()))
            .copied()
            .flatten())
    }

    async fn node_name(&self, node_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.names.lock().unwrap().get(node_id).cloned())
    }
}

/// History store that fails calls for one rule: every call, or only the
/// write that opens an instance.
struct FlakyHistory {
    inner: Arc<MemoryStore>,
    broken_rule: String,
    only_opens: bool,
}

impl FlakyHistory {
    fn check(&self, rule_id: &str) -> oxalert_storage::Result<()> {
        if rule_id == self.broken_rule {
            return Err(StorageError::Other("disk I/O error".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertHistoryStore for FlakyHistory {
    async fn find_unresolved(&self, rule_id: &str) -> oxalert_storage::Result<Option<AlertInstance>> {
        if !self.only_opens {
            self.check(rule_id)?;
        }
        self.inner.find_unresolved(rule_id).await
    }

    async fn create_instance(&self, new: NewAlertInstance) -> oxalert_storage::Result<AlertInstance> {
        self.check(&new.rule_id)?;
        self.inner.create_instance(new).await
    }

    async fn open_instance(&self, new: NewAlertInstance) -> oxalert_storage::Result<AlertInstance> {
        self.check(&new.rule_id)?;
        self.inner.open_instance(new).await
    }

    async fn resolve_instance(
        &self,
        instance_id: &str,
        automatic: bool,
        at: DateTime<Utc>,
    ) -> oxalert_storage::Result<AlertInstance> {
        self.inner.resolve_instance(instance_id, automatic, at).await
    }

    async fn acknowledge_instance(
        &self,
        instance_id: &str,
        user_id: &str,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> oxalert_storage::Result<AlertInstance> {
        self.inner
            .acknowledge_instance(instance_id, user_id, note, at)
            .await
    }

    async fn get_instance(&self, instance_id: &str) -> oxalert_storage::Result<Option<AlertInstance>> {
        self.inner.get_instance(instance_id).await
    }

    async fn list_unresolved(&self) -> oxalert_storage::Result<Vec<AlertInstance>> {
        self.inner.list_unresolved().await
    }
}

/// Rule store whose standalone trigger bookkeeping always fails.
struct NoTriggerWrites {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl RuleStore for NoTriggerWrites {
    async fn insert_rule(&self, rule: &AlertRule) -> oxalert_storage::Result<AlertRule> {
        self.inner.insert_rule(rule).await
    }

    async fn get_rule(&self, rule_id: &str) -> oxalert_storage::Result<Option<AlertRule>> {
        self.inner.get_rule(rule_id).await
    }

    async fn find_rule_by_name(&self, name: &str) -> oxalert_storage::Result<Option<AlertRule>> {
        self.inner.find_rule_by_name(name).await
    }

    async fn list_enabled_rules(&self) -> oxalert_storage::Result<Vec<AlertRule>> {
        self.inner.list_enabled_rules().await
    }

    async fn update_last_triggered(
        &self,
        _rule_id: &str,
        _at: DateTime<Utc>,
    ) -> oxalert_storage::Result<()> {
        Err(StorageError::Other("disk full".to_string()))
    }

    async fn link_channel(&self, rule_id: &str, channel_id: &str) -> oxalert_storage::Result<()> {
        self.inner.link_channel(rule_id, channel_id).await
    }

    async fn linked_channel_ids(&self, rule_id: &str) -> oxalert_storage::Result<Vec<String>> {
        self.inner.linked_channel_ids(rule_id).await
    }
}

// ── Fixtures ──

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn minutes(m: f64) -> DateTime<Utc> {
    t0() + ChronoDuration::milliseconds((m * 60_000.0) as i64)
}

fn cpu_rule(id: &str) -> AlertRule {
    AlertRule {
        id: id.to_string(),
        name: String::new(),
        node_id: "42".to_string(),
        metric_name: "cpu_usage".to_string(),
        condition: Condition::Above,
        threshold: 80.0,
        severity: Severity::Warning,
        enabled: true,
        cooldown_minutes: 5,
        last_triggered_at: None,
        trigger_count: 0,
        created_at: t0(),
        updated_at: t0(),
    }
}

fn webhook(id: &str, url: String) -> NotificationChannel {
    NotificationChannel {
        id: id.to_string(),
        name: format!("hook-{id}"),
        channel_type: ChannelType::Webhook,
        config: json!({ "url": url }),
        enabled: true,
        success_count: 0,
        failure_count: 0,
        created_at: t0(),
        updated_at: t0(),
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    metrics: Arc<ScriptedMetrics>,
    evaluator: Arc<AlertEvaluator>,
}

async fn harness_with_config(
    rules: Vec<AlertRule>,
    channels: Vec<NotificationChannel>,
    config: EvaluatorConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    for rule in &rules {
        store.insert_rule(rule).await.unwrap();
        for ch in &channels {
            store.link_channel(&rule.id, &ch.id).await.unwrap();
        }
    }
    for ch in &channels {
        store.insert_channel(ch).await.unwrap();
    }

    let registry = Arc::new(ChannelRegistry::new());
    registry.refresh(store.as_ref()).await.unwrap();
    let dispatcher = Arc::new(NotificationDispatcher::new(
        registry,
        store.clone(),
        Duration::from_secs(5),
    ));
    let metrics = Arc::new(ScriptedMetrics::default());
    let evaluator = Arc::new(AlertEvaluator::new(
        store.clone(),
        store.clone(),
        metrics.clone(),
        dispatcher,
        config,
    ));
    Harness {
        store,
        metrics,
        evaluator,
    }
}

async fn harness(rules: Vec<AlertRule>, channels: Vec<NotificationChannel>) -> Harness {
    harness_with_config(rules, channels, EvaluatorConfig::default()).await
}

// ── Condition & cooldown ──

#[test]
fn condition_table() {
    assert!(satisfied(80.1, Condition::Above, 80.0));
    assert!(!satisfied(80.0, Condition::Above, 80.0));
    assert!(satisfied(79.9, Condition::Below, 80.0));
    assert!(!satisfied(80.0, Condition::Below, 80.0));
    assert!(satisfied(80.009, Condition::Equals, 80.0));
    assert!(!satisfied(80.02, Condition::Equals, 80.0));
    assert!(satisfied(80.02, Condition::NotEquals, 80.0));
    assert!(!satisfied(80.005, Condition::NotEquals, 80.0));

    for cond in [Condition::Above, Condition::Below, Condition::Equals, Condition::NotEquals] {
        assert!(!satisfied(f64::NAN, cond, 80.0));
        assert!(!satisfied(f64::INFINITY, cond, 80.0));
        assert!(!satisfied(1.0, cond, f64::NAN));
        assert!(!satisfied(1.0, cond, f64::NEG_INFINITY));
    }
}

#[test]
fn cooldown_measured_from_last_trigger() {
    let now = minutes(10.0);
    assert!(permitted(None, 5, now));
    assert!(!permitted(Some(minutes(5.5)), 5, now));
    assert!(permitted(Some(minutes(5.0)), 5, now));
    // Zero is clamped to one minute.
    assert!(!permitted(Some(minutes(9.5)), 0, now));
    assert!(permitted(Some(minutes(9.0)), 0, now));
}

// ── Evaluator ──

#[tokio::test]
async fn breach_opens_one_instance_and_dispatches_once() {
    let mut server = mockito::Server::new_async().await;
    let hook = server
        .mock("POST", "/hook")
        .match_body(mockito::Matcher::PartialJson(json!({"event": "trigger"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let h = harness(
        vec![cpu_rule("r1")],
        vec![webhook("c1", format!("{}/hook", server.url()))],
    )
    .await;
    h.metrics.set("42", "cpu_usage", Some(85.0));
    h.metrics.name_node("42", "web-42");

    let report = h.evaluator.evaluate_at(t0()).await.unwrap();
    let r1 = report.rule("r1").unwrap();
    let instance_id = match &r1.outcome {
        RuleOutcome::Triggered { instance_id } => instance_id.clone(),
        other => panic!("expected trigger, got {other:?}"),
    };
    assert_eq!(r1.dispatch.len(), 1);
    assert!(r1.dispatch[0].is_sent());
    hook.assert_async().await;

    let instances = h.store.instances_for_rule("r1");
    assert_eq!(instances.len(), 1);
    let inst = &instances[0];
    assert_eq!(inst.id, instance_id);
    assert_eq!(
        inst.message,
        "cpu_usage on web-42 is above threshold: 85.00 (threshold: above 80.00)"
    );
    assert_eq!(inst.triggered_at, t0());

    let rule = h.store.get_rule("r1").await.unwrap().unwrap();
    assert_eq!(rule.last_triggered_at, Some(t0()));
    assert_eq!(rule.trigger_count, 1);
}

#[tokio::test]
async fn sustained_breach_keeps_a_single_instance() {
    let h = harness(vec![cpu_rule("r1")], vec![]).await;
    h.metrics.set("42", "cpu_usage", Some(95.0));

    for m in 0..8 {
        h.evaluator.evaluate_at(minutes(m as f64)).await.unwrap();
    }
    assert_eq!(h.store.instances_for_rule("r1").len(), 1);

    let report = h.evaluator.evaluate_at(minutes(9.0)).await.unwrap();
    assert!(matches!(
        report.rule("r1").unwrap().outcome,
        RuleOutcome::Suppressed { .. }
    ));
    let rule = h.store.get_rule("r1").await.unwrap().unwrap();
    assert_eq!(rule.trigger_count, 1);
}

#[tokio::test]
async fn clearing_resolves_automatically_with_one_resolution_dispatch() {
    let mut server = mockito::Server::new_async().await;
    let trigger = server
        .mock("POST", "/hook")
        .match_body(mockito::Matcher::PartialJson(json!({"event": "trigger"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let resolve = server
        .mock("POST", "/hook")
        .match_body(mockito::Matcher::PartialJson(json!({"event": "resolve"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let h = harness(
        vec![cpu_rule("r1")],
        vec![webhook("c1", format!("{}/hook", server.url()))],
    )
    .await;
    h.metrics.set("42", "cpu_usage", Some(90.0));
    h.evaluator.evaluate_at(minutes(0.0)).await.unwrap();

    h.metrics.set("42", "cpu_usage", Some(40.0));
    let report = h.evaluator.evaluate_at(minutes(1.0)).await.unwrap();
    assert!(matches!(
        report.rule("r1").unwrap().outcome,
        RuleOutcome::Resolved { .. }
    ));
    let quiet = h.evaluator.evaluate_at(minutes(2.0)).await.unwrap();
    assert_eq!(quiet.rule("r1").unwrap().outcome, RuleOutcome::Quiet);

    trigger.assert_async().await;
    resolve.assert_async().await;

    let inst = &h.store.instances_for_rule("r1")[0];
    assert!(inst.resolved);
    assert!(inst.resolved_automatically);
    assert_eq!(inst.resolved_at, Some(minutes(1.0)));

    let attempts = h.store.list_attempts(&inst.id).await.unwrap();
    let kinds: Vec<EventKind> = attempts.iter().map(|a| a.event_kind).collect();
    assert_eq!(kinds, vec![EventKind::Trigger, EventKind::Resolve]);
}

#[tokio::test]
async fn retrigger_waits_for_cooldown() {
    let h = harness(vec![cpu_rule("r1")], vec![]).await;
    h.metrics.set("42", "cpu_usage", Some(90.0));
    h.evaluator.evaluate_at(minutes(0.0)).await.unwrap();
    h.metrics.set("42", "cpu_usage", Some(10.0));
    h.evaluator.evaluate_at(minutes(1.0)).await.unwrap();

    h.metrics.set("42", "cpu_usage", Some(90.0));
    let early = h.evaluator.evaluate_at(minutes(3.0)).await.unwrap();
    assert_eq!(early.rule("r1").unwrap().outcome, RuleOutcome::CoolingDown);
    assert_eq!(h.store.instances_for_rule("r1").len(), 1);

    let later = h.evaluator.evaluate_at(minutes(5.0)).await.unwrap();
    assert!(matches!(
        later.rule("r1").unwrap().outcome,
        RuleOutcome::Triggered { .. }
    ));
    let instances = h.store.instances_for_rule("r1");
    assert_eq!(instances.len(), 2);
    assert!(instances[0].resolved);
    assert!(!instances[1].resolved);
}

#[tokio::test]
async fn failing_channel_leaves_siblings_and_rule_state_alone() {
    let mut server = mockito::Server::new_async().await;
    let _a = server.mock("POST", "/a").with_status(200).create_async().await;
    let _b = server.mock("POST", "/b").with_status(503).create_async().await;
    let _c = server.mock("POST", "/c").with_status(204).create_async().await;

    let h = harness(
        vec![cpu_rule("r1")],
        vec![
            webhook("c1", format!("{}/a", server.url())),
            webhook("c2", format!("{}/b", server.url())),
            webhook("c3", format!("{}/c", server.url())),
        ],
    )
    .await;
    h.metrics.set("42", "cpu_usage", Some(99.0));

    let report = h.evaluator.evaluate_at(t0()).await.unwrap();
    let r1 = report.rule("r1").unwrap();
    assert!(matches!(r1.outcome, RuleOutcome::Triggered { .. }));

    let inst = h.store.find_unresolved("r1").await.unwrap().unwrap();
    let attempts = h.store.list_attempts(&inst.id).await.unwrap();
    assert_eq!(attempts.len(), 3);
    let outcome_of = |id: &str| {
        attempts
            .iter()
            .find(|a| a.channel_id == id)
            .map(|a| a.outcome)
            .unwrap()
    };
    assert_eq!(outcome_of("c1"), AttemptOutcome::Sent);
    assert_eq!(outcome_of("c2"), AttemptOutcome::Failed);
    assert_eq!(outcome_of("c3"), AttemptOutcome::Sent);

    let rule = h.store.get_rule("r1").await.unwrap().unwrap();
    assert_eq!(rule.trigger_count, 1);
    assert!(!inst.resolved);
}

#[tokio::test]
async fn acknowledged_instance_still_auto_resolves() {
    let h = harness(vec![cpu_rule("r1")], vec![]).await;
    h.metrics.set("42", "cpu_usage", Some(90.0));
    h.evaluator.evaluate_at(minutes(0.0)).await.unwrap();

    let open = h.store.find_unresolved("r1").await.unwrap().unwrap();
    let acked = h
        .store
        .acknowledge_instance(&open.id, "ops", None, minutes(0.5))
        .await
        .unwrap();
    assert!(acked.acknowledged);
    assert!(!acked.resolved);

    h.metrics.set("42", "cpu_usage", Some(10.0));
    h.evaluator.evaluate_at(minutes(1.0)).await.unwrap();
    let inst = h.store.get_instance(&open.id).await.unwrap().unwrap();
    assert!(inst.acknowledged);
    assert!(inst.resolved);
    assert!(inst.resolved_automatically);
}

#[tokio::test]
async fn unavailable_metrics_skip_without_mutation() {
    let h = harness_with_config(
        vec![cpu_rule("r1")],
        vec![],
        EvaluatorConfig {
            metric_timeout: Duration::from_millis(100),
            ..EvaluatorConfig::default()
        },
    )
    .await;

    // No data at all.
    let report = h.evaluator.evaluate_at(t0()).await.unwrap();
    assert!(matches!(report.rule("r1").unwrap().outcome, RuleOutcome::Skipped { .. }));

    // Provider error while an instance is open must not resolve it.
    h.metrics.set("42", "cpu_usage", Some(90.0));
    h.evaluator.evaluate_at(minutes(1.0)).await.unwrap();
    h.metrics.fail(true);
    let report = h.evaluator.evaluate_at(minutes(2.0)).await.unwrap();
    assert!(matches!(report.rule("r1").unwrap().outcome, RuleOutcome::Skipped { .. }));
    h.metrics.fail(false);

    // Timeout.
    h.metrics.set("42", "cpu_usage", Some(10.0));
    h.metrics.delay(Some(Duration::from_millis(500)));
    let report = h.evaluator.evaluate_at(minutes(3.0)).await.unwrap();
    match &report.rule("r1").unwrap().outcome {
        RuleOutcome::Skipped { reason } => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected skip, got {other:?}"),
    }
    h.metrics.delay(None);

    // NaN is treated as no usable value.
    h.metrics.set("42", "cpu_usage", Some(f64::NAN));
    h.evaluator.evaluate_at(minutes(4.0)).await.unwrap();

    let instances = h.store.instances_for_rule("r1");
    assert_eq!(instances.len(), 1);
    assert!(!instances[0].resolved);
}

#[tokio::test]
async fn storage_failure_is_contained_to_its_rule() {
    let log_store = Arc::new(MemoryStore::new());
    let mut bad = cpu_rule("bad");
    bad.node_id = "7".to_string();
    let h = harness(vec![cpu_rule("good"), bad], vec![]).await;
    // Rebuild the evaluator around a history store that fails for "bad".
    let flaky: Arc<dyn AlertHistoryStore> = Arc::new(FlakyHistory {
        inner: h.store.clone(),
        broken_rule: "bad".to_string(),
        only_opens: false,
    });
    let registry = Arc::new(ChannelRegistry::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        registry,
        log_store.clone(),
        Duration::from_secs(1),
    ));
    let evaluator = Arc::new(AlertEvaluator::new(
        h.store.clone(),
        flaky,
        h.metrics.clone(),
        dispatcher,
        EvaluatorConfig::default(),
    ));

    h.metrics.set("42", "cpu_usage", Some(90.0));
    h.metrics.set("7", "cpu_usage", Some(90.0));
    let report = evaluator.evaluate_at(t0()).await.unwrap();

    assert!(matches!(report.rule("good").unwrap().outcome, RuleOutcome::Triggered { .. }));
    match &report.rule("bad").unwrap().outcome {
        RuleOutcome::Failed { error } => assert!(error.contains("disk I/O error"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.failed(), 1);
    assert!(h.store.instances_for_rule("bad").is_empty());
}

#[tokio::test]
async fn failed_trigger_write_dispatches_nothing_and_keeps_cooldown_state() {
    let mut server = mockito::Server::new_async().await;
    let hook = server
        .mock("POST", "/hook")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;
    let h = harness(vec![cpu_rule("r1")], vec![webhook("c1", format!("{}/hook", server.url()))]).await;
    let flaky: Arc<dyn AlertHistoryStore> = Arc::new(FlakyHistory {
        inner: h.store.clone(),
        broken_rule: "r1".to_string(),
        only_opens: true,
    });
    let registry = Arc::new(ChannelRegistry::new());
    registry.refresh(h.store.as_ref()).await.unwrap();
    let dispatcher = Arc::new(NotificationDispatcher::new(
        registry,
        h.store.clone(),
        Duration::from_secs(1),
    ));
    let evaluator = Arc::new(AlertEvaluator::new(
        h.store.clone(),
        flaky,
        h.metrics.clone(),
        dispatcher,
        EvaluatorConfig::default(),
    ));

    h.metrics.set("42", "cpu_usage", Some(90.0));
    let report = evaluator.evaluate_at(t0()).await.unwrap();

    let rule_report = report.rule("r1").unwrap();
    assert!(matches!(rule_report.outcome, RuleOutcome::Failed { .. }), "{:?}", rule_report.outcome);
    assert!(rule_report.dispatch.is_empty());
    assert!(h.store.instances_for_rule("r1").is_empty());
    let rule = h.store.get_rule("r1").await.unwrap().unwrap();
    assert_eq!(rule.trigger_count, 0);
    assert!(rule.last_triggered_at.is_none());
    assert!(h.store.all_attempts().is_empty());
    hook.assert_async().await;
}

#[tokio::test]
async fn flapping_within_cooldown_does_not_notify_twice() {
    let h = harness(vec![cpu_rule("r1")], vec![]).await;
    // Trigger bookkeeping must not depend on the rule store's own update.
    let rules: Arc<dyn RuleStore> = Arc::new(NoTriggerWrites {
        inner: h.store.clone(),
    });
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(ChannelRegistry::new()),
        h.store.clone(),
        Duration::from_secs(1),
    ));
    let evaluator = Arc::new(AlertEvaluator::new(
        rules,
        h.store.clone(),
        h.metrics.clone(),
        dispatcher,
        EvaluatorConfig::default(),
    ));

    h.metrics.set("42", "cpu_usage", Some(90.0));
    let first = evaluator.evaluate_at(t0()).await.unwrap();
    assert!(matches!(first.rule("r1").unwrap().outcome, RuleOutcome::Triggered { .. }));

    h.metrics.set("42", "cpu_usage", Some(10.0));
    let second = evaluator.evaluate_at(minutes(1.0)).await.unwrap();
    assert!(matches!(second.rule("r1").unwrap().outcome, RuleOutcome::Resolved { .. }));

    h.metrics.set("42", "cpu_usage", Some(90.0));
    let third = evaluator.evaluate_at(minutes(2.0)).await.unwrap();
    assert_eq!(third.rule("r1").unwrap().outcome, RuleOutcome::CoolingDown);

    assert_eq!(h.store.instances_for_rule("r1").len(), 1);
    let rule = h.store.get_rule("r1").await.unwrap().unwrap();
    assert_eq!(rule.trigger_count, 1);
    assert_eq!(rule.last_triggered_at, Some(t0()));
}

#[tokio::test]
async fn concurrent_ticks_never_double_open() {
    let h = harness(vec![cpu_rule("r1")], vec![]).await;
    h.metrics.set("42", "cpu_usage", Some(90.0));

    let (a, b) = tokio::join!(
        h.evaluator.evaluate_at(t0()),
        h.evaluator.evaluate_at(t0())
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(h.store.instances_for_rule("r1").len(), 1);
    assert_eq!(h.store.list_unresolved().await.unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_rules_are_not_evaluated() {
    let mut off = cpu_rule("off");
    off.enabled = false;
    let h = harness(vec![off], vec![]).await;
    h.metrics.set("42", "cpu_usage", Some(90.0));
    let report = h.evaluator.evaluate_at(t0()).await.unwrap();
    assert!(report.rules.is_empty());
}

#[tokio::test]
async fn node_name_falls_back_to_node_id() {
    let mut rule = cpu_rule("r1");
    rule.condition = Condition::NotEquals;
    rule.threshold = 0.0;
    let h = harness(vec![rule], vec![]).await;
    h.metrics.set("42", "cpu_usage", Some(3.5));
    h.evaluator.evaluate_at(t0()).await.unwrap();
    let inst = &h.store.instances_for_rule("r1")[0];
    assert_eq!(
        inst.message,
        "cpu_usage on 42 is not-equals threshold: 3.50 (threshold: not-equals 0.00)"
    );
}

/// t=0 85 opens #1, t=2 90 no-op, t=6 40 resolves, t=7 95 opens #2,
/// t=7.5 acknowledge #2.
#[tokio::test]
async fn cpu_incident_timeline() {
    let mut server = mockito::Server::new_async().await;
    let pager = server
        .mock("POST", "/pager")
        .with_status(202)
        .expect(3)
        .create_async()
        .await;
    let chat = server
        .mock("POST", "/chat")
        .with_status(200)
        .expect(3)
        .create_async()
        .await;

    let h = harness(
        vec![cpu_rule("cpu")],
        vec![
            webhook("pager", format!("{}/pager", server.url())),
            webhook("chat", format!("{}/chat", server.url())),
        ],
    )
    .await;
    let ev = &h.evaluator;

    h.metrics.set("42", "cpu_usage", Some(85.0));
    let r = ev.evaluate_at(minutes(0.0)).await.unwrap();
    let first = match &r.rule("cpu").unwrap().outcome {
        RuleOutcome::Triggered { instance_id } => instance_id.clone(),
        other => panic!("t=0: {other:?}"),
    };
    assert_eq!(r.rule("cpu").unwrap().dispatch.len(), 2);

    h.metrics.set("42", "cpu_usage", Some(90.0));
    let r = ev.evaluate_at(minutes(2.0)).await.unwrap();
    assert_eq!(
        r.rule("cpu").unwrap().outcome,
        RuleOutcome::Suppressed {
            instance_id: first.clone()
        }
    );
    assert!(r.rule("cpu").unwrap().dispatch.is_empty());

    h.metrics.set("42", "cpu_usage", Some(40.0));
    let r = ev.evaluate_at(minutes(6.0)).await.unwrap();
    assert_eq!(
        r.rule("cpu").unwrap().outcome,
        RuleOutcome::Resolved {
            instance_id: first.clone()
        }
    );

    h.metrics.set("42", "cpu_usage", Some(95.0));
    let r = ev.evaluate_at(minutes(7.0)).await.unwrap();
    let second = match &r.rule("cpu").unwrap().outcome {
        RuleOutcome::Triggered { instance_id } => instance_id.clone(),
        other => panic!("t=7: {other:?}"),
    };
    assert_ne!(first, second);

    let acked = h
        .store
        .acknowledge_instance(&second, "oncall", Some("investigating"), minutes(7.5))
        .await
        .unwrap();
    assert!(acked.acknowledged);
    assert_eq!(acked.acknowledge_note.as_deref(), Some("investigating"));
    assert!(!acked.resolved);

    pager.assert_async().await;
    chat.assert_async().await;

    let one = h.store.get_instance(&first).await.unwrap().unwrap();
    assert!(one.resolved && one.resolved_automatically);
    assert_eq!(one.resolved_at, Some(minutes(6.0)));

    let rule = h.store.get_rule("cpu").await.unwrap().unwrap();
    assert_eq!(rule.trigger_count, 2);
    assert_eq!(rule.last_triggered_at, Some(minutes(7.0)));

    assert_eq!(h.store.list_attempts(&first).await.unwrap().len(), 4);
    assert_eq!(h.store.list_attempts(&second).await.unwrap().len(), 2);
    let pager_channel = h.store.get_channel("pager").await.unwrap().unwrap();
    assert_eq!(pager_channel.success_count, 3);
}

// ── Scheduler ──

#[tokio::test]
async fn scheduler_runs_immediately_and_stops_idempotently() {
    let h = harness(vec![cpu_rule("r1")], vec![]).await;
    h.metrics.set("42", "cpu_usage", Some(90.0));

    let scheduler = AlertScheduler::new(h.evaluator.clone(), Duration::from_secs(3600));
    assert!(!scheduler.is_running());
    assert!(scheduler.start());
    assert!(scheduler.is_running());
    assert!(!scheduler.start(), "second start is a no-op");

    // The first pass runs right away, long before the hourly interval.
    let mut waited = 0;
    while h.store.instances_for_rule("r1").is_empty() && waited < 50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }
    assert_eq!(h.store.instances_for_rule("r1").len(), 1);

    scheduler.stop();
    assert!(!scheduler.is_running());
    scheduler.stop();
    scheduler.shutdown().await;
    assert!(!scheduler.is_running());

    // Restart after stop works.
    assert!(scheduler.start());
    scheduler.shutdown().await;
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn stop_lets_the_running_tick_finish() {
    let h = harness(vec![cpu_rule("r1")], vec![]).await;
    h.metrics.set("42", "cpu_usage", Some(90.0));
    h.metrics.delay(Some(Duration::from_millis(300)));

    let scheduler = AlertScheduler::new(h.evaluator.clone(), Duration::from_secs(3600));
    assert!(scheduler.start());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.store.instances_for_rule("r1").is_empty(), "tick still in flight");

    scheduler.stop();
    scheduler.shutdown().await;

    assert!(!scheduler.is_running());
    assert_eq!(h.store.instances_for_rule("r1").len(), 1);
}

#[tokio::test]
async fn shutdown_waits_for_loops_from_earlier_starts() {
    let h = harness(vec![cpu_rule("r1")], vec![]).await;
    h.metrics.set("42", "cpu_usage", Some(90.0));
    h.metrics.delay(Some(Duration::from_millis(300)));

    let scheduler = AlertScheduler::new(h.evaluator.clone(), Duration::from_secs(3600));
    assert!(scheduler.start());
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.stop();

    // Restart while the first loop is still mid-tick, then stop the new loop
    // before it ever ticks.
    assert!(scheduler.start());
    scheduler.stop();
    scheduler.shutdown().await;

    // Only the first loop's tick could have opened the instance.
    assert_eq!(h.store.instances_for_rule("r1").len(), 1);
    let rule = h.store.get_rule("r1").await.unwrap().unwrap();
    assert_eq!(rule.trigger_count, 1);
}
