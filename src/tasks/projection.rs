//! Per-page financial-metrics extraction for the projection view.
//!
//! Projection records are additive and advisory, so this handler never
//! asks the queue for a redelivery: any failure becomes a skip response
//! and the page simply contributes no metrics.

use crate::{
    page_store::image_path,
    prelude::*,
    tasks::{PageMetadata, Services, WorkerResponse, decode_payload},
};

/// Handle one `/worker/projection:analyze` delivery.
#[instrument(skip_all)]
pub async fn run(services: &Services, payload: Value) -> Result<WorkerResponse, PipelineError> {
    let metadata: PageMetadata = decode_payload(payload)?;
    let page_number = metadata.page_number;
    match run_inner(services, &metadata).await {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(page_number, %err, "skipping page for projection");
            Ok(WorkerResponse::skipped(page_number, err))
        }
    }
}

async fn run_inner(
    services: &Services,
    metadata: &PageMetadata,
) -> Result<WorkerResponse, PipelineError> {
    let page_number = metadata.page_number;
    info!(
        file_uuid = %metadata.file_uuid,
        page_number,
        "extracting financial metrics"
    );

    let project_id = services.results.selected_project_id(&metadata.user_id).await?;

    // Confirm the page image exists among the file's stored images before
    // spending an LLM call on it.
    let expected_path = image_path(
        &metadata.user_id,
        &project_id,
        &metadata.file_uuid,
        page_number,
    );
    let images = services
        .pages
        .list_images(&metadata.user_id, &project_id, &metadata.file_uuid)
        .await?;
    if !images.contains(&expected_path) {
        return Err(PipelineError::NotFound(format!("page image {expected_path}")));
    }
    let image_url = services
        .pages
        .signed_url(&metadata.user_id, &project_id, &metadata.file_uuid, page_number)
        .await?;

    let extraction = services.extraction.financial_metrics(&image_url).await?;
    debug!(
        steps = extraction.steps.len(),
        summaries = extraction.business_summaries.len(),
        "metrics extraction finished"
    );

    let mut saved = 0;
    for metrics in &extraction.business_summaries {
        if services
            .results
            .save_financial_metrics(
                &metadata.user_id,
                &project_id,
                &metadata.file_uuid,
                page_number,
                metrics,
            )
            .await?
            .is_some()
        {
            saved += 1;
        }
    }
    info!(page_number, saved, "persisted financial metrics");

    Ok(WorkerResponse::success(page_number))
}
