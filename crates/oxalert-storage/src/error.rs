/// Errors surfaced by the rule, history, channel and attempt stores.
///
/// # Examples
///
/// ```rust
/// use oxalert_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert_instance",
///     id: "1234".to_string(),
/// };
/// assert!(err.to_string().contains("alert_instance"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A write would break a store invariant (an open instance already
    /// exists for the rule, a duplicate channel name, resolving twice).
    #[error("Storage: conflict on {entity} (id={id}): {reason}")]
    Conflict {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (channel config columns).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A column held a value that does not map onto the domain type.
    #[error("Storage: invalid value in column '{column}': {value}")]
    InvalidColumn { column: &'static str, value: String },

    #[error("Storage: {0}")]
    Other(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
