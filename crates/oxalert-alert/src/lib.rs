//! Alert evaluation for standing threshold rules.
//!
//! On every tick the [`evaluator::AlertEvaluator`] polls the current value of
//! each enabled rule's metric, applies [`condition::satisfied`] and the
//! [`cooldown::permitted`] check, and opens or resolves alert instances. Each
//! opening and each resolution is handed to the notification dispatcher. The
//! [`scheduler::AlertScheduler`] drives ticks on a fixed interval.

pub mod condition;
pub mod cooldown;
pub mod error;
pub mod evaluator;
pub mod scheduler;

#[cfg(test)]
mod tests;

use async_trait::async_trait;

pub use error::{AlertError, Result};
pub use evaluator::{AlertEvaluator, EvaluatorConfig, RuleOutcome, RuleReport, TickReport};
pub use scheduler::AlertScheduler;

/// Source of current metric values.
///
/// Implementations answer "what is metric M on node N right now", aggregated
/// over a trailing window. They must be safe to call concurrently.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Latest value of `metric_name` on `node_id` over the last
    /// `window_minutes`, or `None` when no data is available.
    async fn get_value(
        &self,
        node_id: &str,
        metric_name: &str,
        window_minutes: u32,
    ) -> anyhow::Result<Option<f64>>;

    /// Human-readable node label for notification text.
    async fn node_name(&self, node_id: &str) -> anyhow::Result<Option<String>>;
}
