use crate::config::MetricsConfig;
use anyhow::{bail, Context};
use async_trait::async_trait;
use oxalert_alert::MetricsProvider;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ValueResponse {
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct NodeResponse {
    #[serde(default)]
    name: Option<String>,
}

/// [`MetricsProvider`] backed by the metrics REST API.
///
/// `GET {base}/api/v1/nodes/{node}/metrics/{metric}?window_minutes=N` answers
/// `{"value": <number|null>}`; a 404 means the node or metric has no data.
/// Node ids and metric names are percent-encoded as single path segments.
pub struct HttpMetricsProvider {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpMetricsProvider {
    pub fn new(config: &MetricsConfig) -> anyhow::Result<Self> {
        if config.base_url.trim().is_empty() {
            bail!("metrics.base_url must be set");
        }
        let base_url = Url::parse(config.base_url.trim())
            .with_context(|| format!("Invalid metrics.base_url '{}'", config.base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("metrics.base_url '{}' cannot carry a path", config.base_url);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("Failed to build metrics HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// `{base}/api/v1/nodes/{segments...}`, each segment encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("metrics base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["api", "v1", "nodes"])
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl MetricsProvider for HttpMetricsProvider {
    async fn get_value(
        &self,
        node_id: &str,
        metric_name: &str,
        window_minutes: u32,
    ) -> anyhow::Result<Option<f64>> {
        let url = self.endpoint(&[node_id, "metrics", metric_name])?;
        let resp = self
            .get(url)
            .query(&[("window_minutes", window_minutes)])
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("metrics API returned {status}: {body}");
        }
        let parsed: ValueResponse = resp.json().await?;
        Ok(parsed.value)
    }

    async fn node_name(&self, node_id: &str) -> anyhow::Result<Option<String>> {
        let url = self.endpoint(&[node_id])?;
        let resp = self.get(url).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            bail!("metrics API returned {status} for node {node_id}");
        }
        let parsed: NodeResponse = resp.json().await?;
        Ok(parsed.name.filter(|n| !n.is_empty()))
    }
}
