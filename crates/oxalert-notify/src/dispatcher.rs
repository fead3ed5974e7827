use crate::error::NotifyError;
use crate::registry::{ChannelRegistry, RegisteredChannel};
use crate::SendResponse;
use chrono::Utc;
use oxalert_common::types::{
    AlertEvent, AttemptOutcome, ChannelType, NotificationAttempt,
};
use oxalert_storage::NotificationLog;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of one channel's attempt for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutcome {
    pub channel_id: String,
    pub channel_type: ChannelType,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
}

impl ChannelOutcome {
    pub fn is_sent(&self) -> bool {
        self.outcome == AttemptOutcome::Sent
    }
}

/// Fans an event out to a rule's linked channels.
///
/// Every channel gets its own task, a bounded send timeout and exactly one
/// attempt row. A failing or hanging channel never affects its siblings, and
/// nothing is retried.
pub struct NotificationDispatcher {
    registry: Arc<ChannelRegistry>,
    log: Arc<dyn NotificationLog>,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        log: Arc<dyn NotificationLog>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            log,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Sends `event` to each of `channel_ids` concurrently and waits for all of them.
    ///
    /// Channels that are disabled or missing from the registry are skipped
    /// without an attempt row.
    pub async fn dispatch(&self, event: &AlertEvent, channel_ids: &[String]) -> Vec<ChannelOutcome> {
        let event = Arc::new(event.clone());
        let mut handles = Vec::with_capacity(channel_ids.len());

        for channel_id in channel_ids {
            let Some(registered) = self.registry.get(channel_id) else {
                tracing::warn!(
                    rule_id = %event.rule.id,
                    channel_id = %channel_id,
                    "Linked channel is disabled or not loaded, skipping"
                );
                continue;
            };
            if !registered.channel.enabled {
                tracing::debug!(channel_id = %channel_id, "Channel disabled, skipping");
                continue;
            }

            let event = Arc::clone(&event);
            let log = Arc::clone(&self.log);
            let send_timeout = self.send_timeout;
            let channel_type = registered.adapter.channel_type();
            let handle = tokio::spawn(async move {
                deliver_one(registered, event, log, send_timeout).await
            });
            handles.push((channel_id.clone(), channel_type, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (channel_id, channel_type, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(channel_id = %channel_id, error = %e, "Dispatch task panicked");
                    outcomes.push(ChannelOutcome {
                        channel_id,
                        channel_type,
                        outcome: AttemptOutcome::Failed,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        outcomes
    }
}

async fn deliver_one(
    registered: Arc<RegisteredChannel>,
    event: Arc<AlertEvent>,
    log: Arc<dyn NotificationLog>,
    send_timeout: Duration,
) -> ChannelOutcome {
    let channel = &registered.channel;
    let started = Instant::now();
    let response = match tokio::time::timeout(send_timeout, registered.adapter.send(&event)).await
    {
        Ok(response) => response,
        Err(_) => SendResponse::failed(
            None,
            NotifyError::Timeout {
                after_ms: send_timeout.as_millis() as u64,
            },
        ),
    };
    let duration_ms = started.elapsed().as_millis() as i64;

    let outcome = if response.is_success() {
        AttemptOutcome::Sent
    } else {
        AttemptOutcome::Failed
    };
    let error = response.error.as_ref().map(ToString::to_string);

    match &error {
        None => tracing::info!(
            rule_id = %event.rule.id,
            instance_id = %event.instance.id,
            channel_id = %channel.id,
            channel_type = %channel.channel_type,
            event = %event.kind,
            duration_ms,
            "Notification sent"
        ),
        Some(e) => tracing::error!(
            rule_id = %event.rule.id,
            instance_id = %event.instance.id,
            channel_id = %channel.id,
            channel_type = %channel.channel_type,
            event = %event.kind,
            error = %e,
            "Notification failed"
        ),
    }

    let attempt = NotificationAttempt {
        id: oxalert_common::id::next_id(),
        instance_id: event.instance.id.clone(),
        rule_id: event.rule.id.clone(),
        channel_id: channel.id.clone(),
        channel_type: channel.channel_type,
        event_kind: event.kind,
        outcome,
        error: error.clone(),
        duration_ms,
        request_body: response.request_body,
        http_status: response.http_status,
        response_body: response.response_body,
        created_at: Utc::now(),
    };
    if let Err(e) = log.record_attempt(&attempt).await {
        tracing::error!(
            channel_id = %channel.id,
            instance_id = %event.instance.id,
            error = %e,
            "Failed to record notification attempt"
        );
    }

    ChannelOutcome {
        channel_id: channel.id.clone(),
        channel_type: channel.channel_type,
        outcome,
        error,
    }
}
