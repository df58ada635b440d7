//! Mapping task payloads to worker endpoints and enqueueing them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    prelude::*,
    stores::{TaskHandle, TaskQueue},
};

/// The worker endpoints the task queue delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEndpoint {
    /// Targeted by the upload flow, outside this crate; workers only
    /// consume it.
    FileSeparation,
    SummaryAnalysis,
    PageAnalysis,
    ProjectionAnalysis,
    AnalystAggregation,
}

impl WorkerEndpoint {
    /// The path the queue POSTs to for this endpoint.
    pub fn path(self) -> &'static str {
        match self {
            WorkerEndpoint::FileSeparation => "/worker/file:separate",
            WorkerEndpoint::SummaryAnalysis => "/worker/summary:analyze",
            WorkerEndpoint::PageAnalysis => "/worker/page:analyze",
            WorkerEndpoint::ProjectionAnalysis => "/worker/projection:analyze",
            WorkerEndpoint::AnalystAggregation => "/worker/analyst:analyze",
        }
    }
}

/// Enqueues worker tasks against the configured base URL.
pub struct TaskDispatcher {
    queue: Arc<dyn TaskQueue>,
    base_url: String,
}

impl TaskDispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, base_url: &str) -> Self {
        Self {
            queue,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Enqueue `payload` for delivery to `endpoint`.
    pub async fn dispatch<P: Serialize>(
        &self,
        endpoint: WorkerEndpoint,
        payload: &P,
    ) -> Result<TaskHandle> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        let payload =
            serde_json::to_value(payload).context("could not serialize task payload")?;
        debug!(%url, "enqueueing task");
        self.queue.enqueue(&url, payload).await
    }
}

/// A task queue that POSTs payloads directly over HTTP. Used when running
/// without a managed queue in front of the worker.
pub struct HttpTaskQueue {
    client: reqwest::Client,
}

impl HttpTaskQueue {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for HttpTaskQueue {
    async fn enqueue(&self, url: &str, payload: Value) -> Result<TaskHandle> {
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("failed to POST task to {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("task POST to {url} failed with {status}: {body}"));
        }
        Ok(TaskHandle(format!("http:{url}")))
    }
}
