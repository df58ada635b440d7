//! Worker task handlers and their payloads.
//!
//! Each handler corresponds to one endpoint the task queue delivers to.
//! Handlers return a [`WorkerResponse`]; recoverable per-page problems
//! become a `skipped` response (delivered with HTTP 200 semantics, so the
//! queue does not redeliver), while terminal errors propagate for the
//! queue layer to retry.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    config::Config,
    dispatch::TaskDispatcher,
    extract::ExtractionClient,
    llm::ChatCompleter,
    page_store::PageStore,
    prelude::*,
    rasterize::PageRasterizer,
    result_store::ResultStore,
    stores::{BlobStore, RecordStore, TaskQueue, VectorIndex},
};

pub mod analyst;
pub mod page;
pub mod projection;
pub mod separate;
pub mod summary;

/// Payload for the file-separation task: a freshly uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedUrlMetadata {
    pub user_id: String,
    pub project_id: String,
    /// Blob-store path of the uploaded document.
    pub gcs_path: String,
    pub filename: String,
    pub file_uuid: String,
}

/// Payload for the per-page analysis and projection tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageMetadata {
    pub user_id: String,
    /// Project the file was uploaded under. Handlers re-resolve the
    /// user's selected project rather than trusting this field, but it
    /// travels with the task for traceability.
    pub project_id: String,
    pub file_uuid: String,
    pub file_name: String,
    /// Zero-based page index.
    pub page_number: u32,
    /// Total number of pages dispatched for this file.
    pub max_page_number: u32,
}

/// Payload for the document-summary task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummaryMetadata {
    pub user_id: String,
    pub file_uuid: String,
    pub file_name: String,
    /// Leading text of the document, extracted during separation.
    pub summary_text: String,
}

/// Payload for the aggregation task, enqueued after the last page
/// completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalystMetadata {
    pub user_id: String,
    pub project_id: String,
    pub file_uuid: String,
    pub file_name: String,
}

/// Decode a task payload into its typed form. Unknown or missing fields
/// mean the producer and consumer disagree about the shape, which
/// redelivery can never fix.
pub fn decode_payload<T: DeserializeOwned>(payload: Value) -> Result<T, PipelineError> {
    serde_json::from_value(payload).map_err(|err| PipelineError::InvalidPayload(err.to_string()))
}

/// What a worker handler reports back to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerResponse {
    /// The page was fully processed.
    Success { status: String, received: u32 },
    /// Either a skipped page or a document-level acknowledgement.
    Message { message: String },
}

impl WorkerResponse {
    pub fn success(page_number: u32) -> Self {
        WorkerResponse::Success {
            status: "success".to_string(),
            received: page_number,
        }
    }

    /// A skipped page, in the fixed format downstream log scrapers match.
    pub fn skipped(page_number: u32, reason: impl std::fmt::Display) -> Self {
        WorkerResponse::Message {
            message: format!("Skipping page {page_number} because {reason}"),
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        WorkerResponse::Message {
            message: text.into(),
        }
    }
}

/// Convert a recoverable error into a skip response for one page;
/// anything else propagates for redelivery.
pub(crate) fn skip_or_raise(
    page_number: u32,
    err: PipelineError,
) -> Result<WorkerResponse, PipelineError> {
    if err.page_recoverable() {
        warn!(page_number, %err, "skipping page");
        Ok(WorkerResponse::skipped(page_number, err))
    } else {
        Err(err)
    }
}

/// Everything a task handler needs, wired once at startup and shared.
pub struct Services {
    pub config: Config,
    pub rasterizer: PageRasterizer,
    pub pages: PageStore,
    pub results: ResultStore,
    pub extraction: ExtractionClient,
    pub dispatcher: TaskDispatcher,
    pub blobs: Arc<dyn BlobStore>,
    pub index: Arc<dyn VectorIndex>,
}

impl Services {
    pub fn new(
        config: Config,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn TaskQueue>,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn ChatCompleter>,
    ) -> Self {
        Self {
            rasterizer: PageRasterizer::new(config.rasterize_dpi),
            pages: PageStore::new(blobs.clone(), config.signed_url_ttl),
            results: ResultStore::new(records),
            extraction: ExtractionClient::new(&config, llm),
            dispatcher: TaskDispatcher::new(queue, &config.api_base_url),
            blobs,
            index,
            config,
        }
    }
}
