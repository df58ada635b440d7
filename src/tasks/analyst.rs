//! Aggregation: one long-context narrative over all page transcriptions.

use crate::{
    prelude::*,
    tasks::{AnalystMetadata, Services, WorkerResponse, decode_payload},
};

/// Handle one `/worker/analyst:analyze` delivery.
///
/// The narrative write is an idempotent overwrite, so redeliveries and
/// duplicate fan-in triggers converge on the same stored report.
#[instrument(skip_all)]
pub async fn run(services: &Services, payload: Value) -> Result<WorkerResponse, PipelineError> {
    let metadata: AnalystMetadata = decode_payload(payload)?;
    info!(
        file_uuid = %metadata.file_uuid,
        file_name = %metadata.file_name,
        "writing aggregate analyst report"
    );

    let transcriptions = services
        .results
        .fetch_page_transcriptions(&metadata.user_id, &metadata.project_id, &metadata.file_uuid)
        .await?;
    if transcriptions.is_empty() {
        warn!(file_uuid = %metadata.file_uuid, "no transcriptions to aggregate");
        return Ok(WorkerResponse::message(format!(
            "No transcriptions found for {}",
            metadata.file_name
        )));
    }

    let joined = transcriptions
        .iter()
        .map(|(_, text)| text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let narrative = services.extraction.narrative_report(&joined).await?;

    services
        .results
        .save_aggregate_report(
            &metadata.user_id,
            &metadata.project_id,
            &metadata.file_uuid,
            &narrative,
        )
        .await?;

    Ok(WorkerResponse::message(format!(
        "Analyst report completed for {}",
        metadata.file_name
    )))
}
