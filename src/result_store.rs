//! Persistence of analysis results.
//!
//! Per-page and per-document results are written to deterministic paths,
//! so redelivered tasks overwrite their own earlier output instead of
//! duplicating it. Financial metrics are the exception: they are an
//! append-only event log keyed by a fresh UUID per record, partitioned by
//! reporting period.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    prelude::*,
    schemas::{AnalystReport, DocumentInfo, FinancialMetrics},
    stores::RecordStore,
};

fn pages_collection(user_id: &str, project_id: &str, file_uuid: &str) -> String {
    format!("users/{user_id}/projects/{project_id}/documents/{file_uuid}/pages")
}

fn progress_path(user_id: &str, project_id: &str, file_uuid: &str) -> String {
    format!("users/{user_id}/projects/{project_id}/documents/{file_uuid}/progress")
}

/// One page's stored analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub page_number: u32,
    pub analyst_report: AnalystReport,
    pub transcription: String,
}

/// Does a completion set cover every page in `[0, max_page_number)`?
pub fn completion_covers(completed: &[u32], max_page_number: u32) -> bool {
    (0..max_page_number).all(|page| completed.contains(&page))
}

/// Persistence façade over the record store.
pub struct ResultStore {
    records: Arc<dyn RecordStore>,
}

impl ResultStore {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    async fn set(&self, path: &str, doc: Value) -> Result<(), PipelineError> {
        self.records
            .set(path, doc)
            .await
            .map_err(|source| PipelineError::StorageWrite {
                path: path.to_string(),
                source,
            })
    }

    /// The id of the user's currently selected project.
    pub async fn selected_project_id(&self, user_id: &str) -> Result<String, PipelineError> {
        let collection = format!("users/{user_id}/projects");
        let projects = self.records.list(&collection).await.map_err(|source| {
            PipelineError::StorageRead {
                path: collection.clone(),
                source,
            }
        })?;
        for (path, doc) in projects {
            if doc.get("is_selected").and_then(Value::as_bool) == Some(true) {
                let project_id = path
                    .rsplit('/')
                    .next()
                    .ok_or_else(|| anyhow!("malformed project path {path:?}"))?;
                return Ok(project_id.to_string());
            }
        }
        Err(PipelineError::NotFound(format!(
            "no selected project for user {user_id}"
        )))
    }

    /// Store one page's analyst report and transcription. Idempotent.
    pub async fn save_page_analysis(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
        file_name: &str,
        analysis: &PageAnalysis,
    ) -> Result<(), PipelineError> {
        let path = format!(
            "{}/{}",
            pages_collection(user_id, project_id, file_uuid),
            analysis.page_number
        );
        let mut doc = serde_json::to_value(analysis).context("could not serialize page analysis")?;
        doc["file_name"] = json!(file_name);
        self.set(&path, doc).await
    }

    /// Append one financial-metrics record, returning its id, or `None`
    /// when the record is suppressed (no data, or an invalid period).
    pub async fn save_financial_metrics(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
        page_number: u32,
        metrics: &FinancialMetrics,
    ) -> Result<Option<String>, PipelineError> {
        if !metrics.has_data() {
            info!(file_uuid, page_number, "no financial data extracted, skipping record");
            return Ok(None);
        }
        if let Err(err) = metrics.period.validate() {
            warn!(file_uuid, page_number, %err, "dropping metrics with invalid period");
            return Ok(None);
        }
        let Some(month) = metrics.period.month else {
            warn!(
                file_uuid,
                page_number, "dropping metrics with no month in period"
            );
            return Ok(None);
        };

        let record_id = Uuid::new_v4().to_string();
        let path = format!(
            "users/{user_id}/projects/{project_id}/projection/period/year/{year}/month/{month}/option/{record_id}",
            year = metrics.period.year,
        );
        let mut doc =
            serde_json::to_value(metrics).context("could not serialize financial metrics")?;
        doc["file_uuid"] = json!(file_uuid);
        doc["page_number"] = json!(page_number);
        self.set(&path, doc).await?;
        Ok(Some(record_id))
    }

    /// Store the aggregate narrative. Idempotent, so duplicate fan-in
    /// triggers converge on the same record.
    pub async fn save_aggregate_report(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
        narrative: &str,
    ) -> Result<(), PipelineError> {
        let path = format!(
            "users/{user_id}/projects/{project_id}/documents/{file_uuid}/analyst_report/summary"
        );
        self.set(&path, json!({ "report": narrative })).await
    }

    /// Store the document-level summary on the document record itself.
    pub async fn save_document_summary(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
        file_name: &str,
        info: &DocumentInfo,
    ) -> Result<(), PipelineError> {
        let path = format!("users/{user_id}/projects/{project_id}/documents/{file_uuid}");
        let mut doc = serde_json::to_value(info).context("could not serialize document info")?;
        doc["file_uuid"] = json!(file_uuid);
        doc["file_name"] = json!(file_name);
        self.set(&path, doc).await
    }

    /// All page transcriptions for a file, ascending by page number.
    pub async fn fetch_page_transcriptions(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
    ) -> Result<Vec<(u32, String)>, PipelineError> {
        let collection = pages_collection(user_id, project_id, file_uuid);
        let docs = self.records.list(&collection).await.map_err(|source| {
            PipelineError::StorageRead {
                path: collection.clone(),
                source,
            }
        })?;
        let mut transcriptions = Vec::new();
        for (path, doc) in docs {
            let page_number = doc
                .get("page_number")
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow!("page record {path:?} has no page number"))?;
            let transcription = doc
                .get("transcription")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            transcriptions.push((page_number as u32, transcription));
        }
        transcriptions.sort_by_key(|(page, _)| *page);
        Ok(transcriptions)
    }

    /// Record that one page finished its analysis.
    pub async fn mark_page_complete(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
        page_number: u32,
    ) -> Result<(), PipelineError> {
        let path = progress_path(user_id, project_id, file_uuid);
        self.records
            .array_union(&path, "completed_pages", &[json!(page_number)])
            .await
            .map_err(|source| PipelineError::StorageWrite { path, source })
    }

    /// The completion set for a file, unordered.
    pub async fn completed_pages(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
    ) -> Result<Vec<u32>, PipelineError> {
        let path = progress_path(user_id, project_id, file_uuid);
        let doc = self
            .records
            .get(&path)
            .await
            .map_err(|source| PipelineError::StorageRead {
                path: path.clone(),
                source,
            })?;
        let Some(doc) = doc else {
            return Ok(Vec::new());
        };
        let pages = doc
            .get("completed_pages")
            .and_then(Value::as_array)
            .map(|array| {
                array
                    .iter()
                    .filter_map(Value::as_u64)
                    .map(|page| page as u32)
                    .collect()
            })
            .unwrap_or_default();
        Ok(pages)
    }
}
