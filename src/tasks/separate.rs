//! File separation: split an uploaded PDF into page images and fan out
//! the per-page analysis tasks.

use crate::{
    dispatch::WorkerEndpoint,
    prelude::*,
    tasks::{
        PageMetadata, Services, SignedUrlMetadata, SummaryMetadata, WorkerResponse,
        decode_payload,
    },
};

/// Handle one `/worker/file:separate` delivery.
///
/// Rasterization and image storage are all-or-nothing: a failure here
/// propagates so the queue redelivers the whole file. The fan-out at the
/// end is best-effort per task; the queue's at-least-once delivery of
/// *this* task is what guarantees the pages eventually get dispatched.
#[instrument(skip_all)]
pub async fn run(services: &Services, payload: Value) -> Result<WorkerResponse, PipelineError> {
    let metadata: SignedUrlMetadata = decode_payload(payload)?;
    info!(
        file_uuid = %metadata.file_uuid,
        filename = %metadata.filename,
        "separating uploaded file"
    );

    let pdf_bytes = services
        .blobs
        .get(&metadata.gcs_path)
        .await
        .map_err(|source| PipelineError::StorageRead {
            path: metadata.gcs_path.clone(),
            source,
        })?
        .ok_or_else(|| {
            PipelineError::NotFound(format!("uploaded document {}", metadata.gcs_path))
        })?;

    let pages = services
        .rasterizer
        .rasterize(&pdf_bytes, services.config.max_pages_to_parse)
        .await?;
    let max_page_number = u32::try_from(pages.len()).context("page count overflow")?;

    for (page_index, jpeg_bytes) in pages {
        let page_number = page_index as u32;
        services
            .pages
            .store(
                &metadata.user_id,
                &metadata.project_id,
                &metadata.file_uuid,
                page_number,
                jpeg_bytes,
            )
            .await?;
    }

    let heading_text = services
        .rasterizer
        .heading_text(&pdf_bytes, services.config.heading_text_length)
        .await?;

    // Fan out. An individual enqueue failure loses only that task, and
    // only until this separation task is redelivered.
    let summary = SummaryMetadata {
        user_id: metadata.user_id.clone(),
        file_uuid: metadata.file_uuid.clone(),
        file_name: metadata.filename.clone(),
        summary_text: heading_text,
    };
    if let Err(err) = services
        .dispatcher
        .dispatch(WorkerEndpoint::SummaryAnalysis, &summary)
        .await
    {
        error!(%err, "failed to enqueue summary task");
    }

    for page_number in 0..max_page_number {
        let page = PageMetadata {
            user_id: metadata.user_id.clone(),
            project_id: metadata.project_id.clone(),
            file_uuid: metadata.file_uuid.clone(),
            file_name: metadata.filename.clone(),
            page_number,
            max_page_number,
        };
        for endpoint in [WorkerEndpoint::PageAnalysis, WorkerEndpoint::ProjectionAnalysis] {
            if let Err(err) = services.dispatcher.dispatch(endpoint, &page).await {
                error!(page_number, %err, "failed to enqueue page task");
            }
        }
    }

    Ok(WorkerResponse::message(format!(
        "Separated {} into {} pages",
        metadata.filename, max_page_number
    )))
}
