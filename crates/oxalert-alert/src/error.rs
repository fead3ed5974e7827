use oxalert_storage::StorageError;

/// Errors raised while evaluating a rule.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Alert: storage failure: {0}")]
    Storage(#[from] StorageError),

    /// The metrics provider did not answer within the fetch timeout.
    #[error("Alert: metric {metric_name} on node {node_id} timed out after {after_ms}ms")]
    MetricTimeout {
        node_id: String,
        metric_name: String,
        after_ms: u64,
    },

    #[error("Alert: metrics provider error: {0}")]
    MetricProvider(String),

    #[error("Alert: invalid rule: {0}")]
    InvalidRule(String),
}

pub type Result<T> = std::result::Result<T, AlertError>;
