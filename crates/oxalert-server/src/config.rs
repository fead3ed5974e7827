use oxalert_alert::EvaluatorConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Seconds between evaluation ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_metric_timeout_secs")]
    pub metric_timeout_secs: u64,
    /// Trailing window the metrics API aggregates over.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Upper bound on a single channel send.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_channel_refresh_secs")]
    pub channel_refresh_secs: u64,
    #[serde(default = "default_attempt_retention_days")]
    pub attempt_retention_days: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Base URL of the metrics API, e.g. `http://127.0.0.1:8080`.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_database_file() -> String {
    "oxalert.db".to_string()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_metric_timeout_secs() -> u64 {
    5
}

fn default_window_minutes() -> u32 {
    5
}

fn default_max_concurrent() -> usize {
    8
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_channel_refresh_secs() -> u64 {
    300
}

fn default_attempt_retention_days() -> u32 {
    30
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            metric_timeout_secs: default_metric_timeout_secs(),
            window_minutes: default_window_minutes(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout_secs(),
            channel_refresh_secs: default_channel_refresh_secs(),
            attempt_retention_days: default_attempt_retention_days(),
        }
    }
}

impl EvaluationConfig {
    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            window_minutes: self.window_minutes.max(1),
            metric_timeout: Duration::from_secs(self.metric_timeout_secs.max(1)),
            max_concurrent: self.max_concurrent.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl NotificationConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.channel_refresh_secs.max(1))
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.database_file)
    }
}
