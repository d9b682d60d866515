//! Task runners backed by the external agent.

use anyhow::{Context, bail};
use async_trait::async_trait;
use scout_core::config::RunnerConfig;
use scout_scheduler::{ProgressReporter, RunOutcome, Task, TaskRunner};
use std::sync::Arc;
use std::time::Duration;

/// Pick the runner for `[runner]`: HTTP when an endpoint is set.
pub fn from_config(config: &RunnerConfig) -> anyhow::Result<Arc<dyn TaskRunner>> {
    match config.endpoint.as_deref().map(str::trim) {
        Some(endpoint) if !endpoint.is_empty() => {
            tracing::info!("🤖 Runs dispatched to {endpoint}");
            Ok(Arc::new(HttpRunner::new(endpoint, config.timeout_secs)?))
        }
        _ => {
            tracing::warn!("⚠️ No [runner] endpoint configured; every run will fail");
            Ok(Arc::new(UnconfiguredRunner))
        }
    }
}

/// POSTs the task snapshot to the agent and expects
/// `{"result": "...", "artifacts": [...]}` back.
pub struct HttpRunner {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRunner {
    pub fn new(endpoint: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl TaskRunner for HttpRunner {
    async fn execute(&self, task: Task, progress: ProgressReporter) -> anyhow::Result<RunOutcome> {
        let body = serde_json::json!({
            "run_id": progress.run_id(),
            "task": task,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("agent request failed ({})", self.endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("agent returned {status}: {}", text.trim());
        }

        let outcome: RunOutcome = resp
            .json()
            .await
            .context("agent response is not {\"result\", \"artifacts\"} JSON")?;
        Ok(outcome)
    }
}

/// Fails every run; used when no agent endpoint is configured.
pub struct UnconfiguredRunner;

#[async_trait]
impl TaskRunner for UnconfiguredRunner {
    async fn execute(&self, task: Task, _: ProgressReporter) -> anyhow::Result<RunOutcome> {
        bail!(
            "no runner configured: set [runner] endpoint to execute task '{}'",
            task.name
        )
    }
}
