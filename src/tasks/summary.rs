//! Document-level summary: classify the document from its heading text.

use crate::{
    prelude::*,
    tasks::{Services, SummaryMetadata, WorkerResponse, decode_payload},
};

/// Handle one `/worker/summary:analyze` delivery.
#[instrument(skip_all)]
pub async fn run(services: &Services, payload: Value) -> Result<WorkerResponse, PipelineError> {
    let metadata: SummaryMetadata = decode_payload(payload)?;
    info!(
        file_uuid = %metadata.file_uuid,
        file_name = %metadata.file_name,
        "summarizing document"
    );

    let skip = |err: PipelineError| {
        WorkerResponse::message(format!(
            "Skipping summary for {} because {err}",
            metadata.file_name
        ))
    };

    let project_id = match services.results.selected_project_id(&metadata.user_id).await {
        Ok(project_id) => project_id,
        Err(err) if err.page_recoverable() => {
            warn!(%err, "skipping document summary");
            return Ok(skip(err));
        }
        Err(err) => return Err(err),
    };

    let info = match services
        .extraction
        .document_info(&metadata.file_name, &metadata.summary_text)
        .await
    {
        Ok(info) => info,
        Err(err) if err.page_recoverable() => {
            warn!(%err, "skipping document summary");
            return Ok(skip(err));
        }
        Err(err) => return Err(err),
    };

    services
        .results
        .save_document_summary(
            &metadata.user_id,
            &project_id,
            &metadata.file_uuid,
            &metadata.file_name,
            &info,
        )
        .await?;

    Ok(WorkerResponse::message(format!(
        "Summary analysis completed for {}",
        metadata.file_name
    )))
}
