//! Per-page analysis: analyst report + transcription, persistence,
//! retrieval indexing, and the fan-in check that triggers aggregation.

use crate::{
    data_url::data_url,
    dispatch::WorkerEndpoint,
    prelude::*,
    result_store::{PageAnalysis, completion_covers},
    stores::IndexedPage,
    tasks::{
        AnalystMetadata, PageMetadata, Services, WorkerResponse, decode_payload,
        skip_or_raise,
    },
};

/// Handle one `/worker/page:analyze` delivery.
#[instrument(skip_all)]
pub async fn run(services: &Services, payload: Value) -> Result<WorkerResponse, PipelineError> {
    let metadata: PageMetadata = decode_payload(payload)?;
    let page_number = metadata.page_number;
    info!(
        file_uuid = %metadata.file_uuid,
        page_number,
        max_page_number = metadata.max_page_number,
        "analyzing page"
    );

    let project_id = match services.results.selected_project_id(&metadata.user_id).await {
        Ok(project_id) => project_id,
        Err(err) => return skip_or_raise(page_number, err),
    };

    // A missing signed URL means separation never produced this page;
    // redelivery cannot conjure it up.
    if let Err(err) = services
        .pages
        .signed_url(&metadata.user_id, &project_id, &metadata.file_uuid, page_number)
        .await
    {
        return skip_or_raise(page_number, err);
    }
    let jpeg_bytes = match services
        .pages
        .fetch_image(&metadata.user_id, &project_id, &metadata.file_uuid, page_number)
        .await
    {
        Ok(bytes) => bytes,
        Err(err) => return skip_or_raise(page_number, err),
    };
    let image_url = data_url("image/jpeg", &jpeg_bytes);

    let analyst_report = match services.extraction.analyst_report(&image_url).await {
        Ok(report) => report,
        Err(err) => return skip_or_raise(page_number, err),
    };
    let transcription = match services.extraction.transcription(&image_url).await {
        Ok(report) => report,
        Err(err) => return skip_or_raise(page_number, err),
    };

    let analysis = PageAnalysis {
        page_number,
        analyst_report,
        transcription: transcription.transcription,
    };
    services
        .results
        .save_page_analysis(
            &metadata.user_id,
            &project_id,
            &metadata.file_uuid,
            &metadata.file_name,
            &analysis,
        )
        .await?;

    services
        .index
        .add_document(IndexedPage {
            user_id: metadata.user_id.clone(),
            project_id: project_id.clone(),
            file_uuid: metadata.file_uuid.clone(),
            file_name: metadata.file_name.clone(),
            page_number,
            text: analysis.transcription.clone(),
        })
        .await
        .context("failed to index page transcription")?;

    services
        .results
        .mark_page_complete(&metadata.user_id, &project_id, &metadata.file_uuid, page_number)
        .await?;
    let completed = services
        .results
        .completed_pages(&metadata.user_id, &project_id, &metadata.file_uuid)
        .await?;
    if completion_covers(&completed, metadata.max_page_number) {
        info!(
            file_uuid = %metadata.file_uuid,
            "all pages complete, enqueueing aggregation"
        );
        services
            .dispatcher
            .dispatch(
                WorkerEndpoint::AnalystAggregation,
                &AnalystMetadata {
                    user_id: metadata.user_id.clone(),
                    project_id,
                    file_uuid: metadata.file_uuid.clone(),
                    file_name: metadata.file_name.clone(),
                },
            )
            .await?;
    }

    Ok(WorkerResponse::success(page_number))
}
