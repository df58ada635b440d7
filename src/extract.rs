//! Schema-constrained extraction from page images, with bounded retry.
//!
//! Each extraction view is a typed struct in [`crate::schemas`]. We derive
//! a draft-07 JSON Schema from the type, ask the model for strict JSON
//! matching it, then validate the response ourselves before
//! deserializing. Responses that fail validation are retried with a fixed
//! pause; once the attempt ceiling is reached the caller gets
//! [`PipelineError::ExtractionFailed`] and decides whether the page is
//! skippable.

use std::sync::Arc;

use leaky_bucket::RateLimiter;
use schemars::{JsonSchema, r#gen::SchemaSettings};
use serde::de::DeserializeOwned;

use crate::{
    config::Config,
    llm::{ChatCompleter, CompletionRequest},
    prelude::*,
    retry::{BackoffPolicy, retry_with_backoff},
    schemas::{AnalystReport, DocumentInfo, MetricsExtraction, TranscriptionReport},
};

/// Shared instructions for every vision call. The currency rule matters:
/// Japanese financial documents quote figures in 百万円 (millions of yen)
/// or 億円 (hundreds of millions of yen), and downstream consumers expect
/// plain yen.
const VISION_SYSTEM_PROMPT: &str = "\
You are a financial analyst reading one page of a Japanese business \
document (financial results, pitch deck, or IR material). Read the page \
image carefully, including tables, charts and footnotes.

Rules for monetary values:
- Convert all amounts to plain yen. Figures labeled 百万円 are in \
millions of yen; figures labeled 億円 are in hundreds of millions of yen.
- When a value is given as a range, report the maximum of the range.
- Never invent values that are not on the page. Leave unknown fields null.";

const ANALYST_PROMPT: &str = "\
Analyze this page as an investment analyst. Report: the facts the page \
shows; any issues or anomalies; the rationale for why those issues \
matter; what the page implies for the company's future; and what a \
diligence team should investigate next.";

const TRANSCRIPTION_PROMPT: &str = "\
Transcribe all text on this page faithfully, preserving reading order. \
Render tables as rows of labeled values.";

const METRICS_PROMPT: &str = "\
Extract every financial metric on this page, one summary per reporting \
period and business scope. Work step by step, recording each reasoning \
step, then list the per-period summaries. If the page shows no financial \
metrics, return an empty list of summaries.";

const DOCUMENT_INFO_PROMPT: &str = "\
You are given the opening text of a business document. Classify the \
document: a two-to-three sentence abstract, its distinguishing feature, \
the kinds of information extractable from it, the years it covers, its \
reporting cadence, a coarse category, and its investor-relations \
category if applicable.";

/// The fixed outline the aggregate narrative must follow.
const NARRATIVE_ORDER: &str = "\
Using the page transcriptions below, write a thorough analyst report on \
this company in the following order:
1. Financial data: growth, profitability, and notable line items.
2. Business model: how the company makes money and for whom.
3. Competitive position: market, moat, and key rivals.
4. Risk: the most material risks an investor should weigh.
5. Conclusion: an overall assessment.
Base every claim on the transcriptions; do not invent figures.";

/// Derive the draft-07 schema for an extraction type.
pub fn schema_for<T: JsonSchema>() -> Result<Value> {
    let schema = SchemaSettings::draft07()
        .into_generator()
        .into_root_schema_for::<T>();
    serde_json::to_value(schema).context("could not serialize schema")
}

/// A `system` message.
fn system(text: &str) -> Value {
    json!({ "role": "system", "content": text })
}

/// A `user` message with text only.
fn user(text: &str) -> Value {
    json!({ "role": "user", "content": text })
}

/// A `user` message pairing instructions with an image, which may be a
/// signed URL or a base64 `data:` URL.
fn user_with_image(text: &str, image_url: &str) -> Value {
    json!({
        "role": "user",
        "content": [
            { "type": "text", "text": text },
            { "type": "image_url", "image_url": { "url": image_url } },
        ],
    })
}

/// Runs schema-constrained extractions against the configured models.
pub struct ExtractionClient {
    llm: Arc<dyn ChatCompleter>,
    vision_model: String,
    report_model: String,
    max_retries: usize,
    backoff: BackoffPolicy,
    rate_limiter: Option<RateLimiter>,
}

impl ExtractionClient {
    pub fn new(config: &Config, llm: Arc<dyn ChatCompleter>) -> Self {
        Self {
            llm,
            vision_model: config.vision_model.clone(),
            report_model: config.report_model.clone(),
            max_retries: config.extract_max_retries,
            backoff: BackoffPolicy::Fixed(config.extract_backoff),
            rate_limiter: config
                .llm_rate_limit
                .as_ref()
                .map(|limit| limit.to_rate_limiter()),
        }
    }

    /// Analyst's read of one page image.
    #[instrument(skip_all)]
    pub async fn analyst_report(
        &self,
        image_url: &str,
    ) -> Result<AnalystReport, PipelineError> {
        let messages = vec![
            system(VISION_SYSTEM_PROMPT),
            user_with_image(ANALYST_PROMPT, image_url),
        ];
        self.extract("analyst_report", messages, None).await
    }

    /// Faithful transcription of one page image.
    #[instrument(skip_all)]
    pub async fn transcription(
        &self,
        image_url: &str,
    ) -> Result<TranscriptionReport, PipelineError> {
        let messages = vec![
            system(VISION_SYSTEM_PROMPT),
            user_with_image(TRANSCRIPTION_PROMPT, image_url),
        ];
        self.extract("transcription", messages, None).await
    }

    /// Stepwise financial-metrics extraction from one page image.
    #[instrument(skip_all)]
    pub async fn financial_metrics(
        &self,
        image_url: &str,
    ) -> Result<MetricsExtraction, PipelineError> {
        let messages = vec![
            system(VISION_SYSTEM_PROMPT),
            user_with_image(METRICS_PROMPT, image_url),
        ];
        self.extract("financial_metrics", messages, Some(0.3)).await
    }

    /// Document-level classification from heading text.
    #[instrument(skip_all)]
    pub async fn document_info(
        &self,
        file_name: &str,
        heading_text: &str,
    ) -> Result<DocumentInfo, PipelineError> {
        let messages = vec![
            system(DOCUMENT_INFO_PROMPT),
            user(&format!("File name: {file_name}\n\n{heading_text}")),
        ];
        self.extract("document_info", messages, None).await
    }

    /// Free-form aggregate narrative over all page transcriptions. No
    /// schema and no retry loop; the queue redelivers on failure.
    #[instrument(skip_all)]
    pub async fn narrative_report(&self, transcriptions: &str) -> Result<String> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire_one().await;
        }
        let request = CompletionRequest::new(
            &self.report_model,
            vec![
                user(&format!("{NARRATIVE_ORDER}\n\n{transcriptions}")),
            ],
        );
        let content = self.llm.complete(request).await?;
        content
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("narrative response was not text"))
    }

    /// Shared extraction loop: request strict JSON, validate against the
    /// derived schema, deserialize. Validation failures and transport
    /// errors both count against the attempt budget.
    async fn extract<T>(
        &self,
        name: &str,
        messages: Vec<Value>,
        temperature: Option<f32>,
    ) -> Result<T, PipelineError>
    where
        T: JsonSchema + DeserializeOwned,
    {
        let schema = schema_for::<T>()?;
        let validator = jsonschema::validator_for(&schema)
            .context("could not compile extraction schema")?;

        let mut request =
            CompletionRequest::new(&self.vision_model, messages).with_schema(name, schema);
        if let Some(temperature) = temperature {
            request = request.with_temperature(temperature);
        }

        let parsed = retry_with_backoff(self.max_retries, &self.backoff, || {
            let request = request.clone();
            let validator = &validator;
            async move {
                if let Some(limiter) = &self.rate_limiter {
                    limiter.acquire_one().await;
                }
                let response = self.llm.complete(request).await?;
                validator.validate(&response).map_err(|err| {
                    anyhow!("response failed schema validation: {err}")
                })?;
                serde_json::from_value::<T>(response)
                    .context("response did not match extraction type")
            }
        })
        .await
        .map_err(|err| PipelineError::ExtractionFailed {
            attempts: err.attempts,
            source: err.last_error,
        })?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedChat;

    fn client_with(responses: Vec<Result<Value>>) -> (ExtractionClient, Arc<ScriptedChat>) {
        let chat = Arc::new(ScriptedChat::new(responses));
        let mut config = Config::for_testing("http://localhost");
        config.extract_backoff = std::time::Duration::ZERO;
        (ExtractionClient::new(&config, chat.clone()), chat)
    }

    fn transcription_json(text: &str) -> Value {
        json!({ "transcription": text })
    }

    #[tokio::test]
    async fn extraction_accepts_valid_responses() {
        let (client, chat) = client_with(vec![Ok(transcription_json("page one"))]);
        let report = client.transcription("data:image/jpeg;base64,").await.unwrap();
        assert_eq!(report.transcription, "page one");
        assert_eq!(chat.requests().len(), 1);

        let request = &chat.requests()[0];
        assert!(request.response_schema.is_some());
        assert_eq!(request.model, "gpt-4o-2024-08-06");
    }

    #[tokio::test]
    async fn invalid_responses_are_retried_then_accepted() {
        let (client, chat) = client_with(vec![
            Ok(json!({ "wrong_field": "nope" })),
            Ok(transcription_json("second try")),
        ]);
        let report = client.transcription("data:image/jpeg;base64,").await.unwrap();
        assert_eq!(report.transcription, "second try");
        assert_eq!(chat.requests().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_become_extraction_failed() {
        let (client, chat) = client_with(vec![
            Ok(json!("not even an object")),
            Err(anyhow!("rate limited")),
            Ok(json!({ "transcription": 7 })),
        ]);
        let err = client
            .transcription("data:image/jpeg;base64,")
            .await
            .unwrap_err();
        match err {
            PipelineError::ExtractionFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(chat.requests().len(), 3);
    }

    #[tokio::test]
    async fn metrics_extraction_sets_temperature() {
        let (client, chat) = client_with(vec![Ok(json!({
            "steps": [],
            "business_summaries": [],
        }))]);
        client
            .financial_metrics("https://signed.example/page-0")
            .await
            .unwrap();
        assert_eq!(chat.requests()[0].temperature, Some(0.3));
    }

    #[tokio::test]
    async fn narrative_uses_the_report_model_without_a_schema() {
        let (client, chat) = client_with(vec![Ok(json!("A fine company."))]);
        let narrative = client.narrative_report("page one\npage two").await.unwrap();
        assert_eq!(narrative, "A fine company.");
        let request = &chat.requests()[0];
        assert_eq!(request.model, "o1-2024-12-17");
        assert!(request.response_schema.is_none());
    }
}
