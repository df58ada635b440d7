//! End-to-end pipeline tests over the in-memory stores, with a scripted
//! LLM standing in for the vision models.

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};

use finsight_worker::{
    config::Config,
    llm::ScriptedChat,
    stores::{
        BlobStore as _, MemoryBlobStore, MemoryRecordStore, MemoryTaskQueue,
        MemoryVectorIndex, RecordStore as _,
    },
    tasks::{self, PageMetadata, Services, WorkerResponse},
};

const USER: &str = "u1";
const PROJECT: &str = "p1";
const FILE: &str = "f1";

struct Harness {
    services: Services,
    blobs: Arc<MemoryBlobStore>,
    records: Arc<MemoryRecordStore>,
    queue: Arc<MemoryTaskQueue>,
    index: Arc<MemoryVectorIndex>,
}

async fn harness(responses: Vec<anyhow::Result<Value>>) -> Harness {
    let blobs = Arc::new(MemoryBlobStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let queue = Arc::new(MemoryTaskQueue::new());
    let index = Arc::new(MemoryVectorIndex::new());
    let chat = Arc::new(ScriptedChat::new(responses));

    records
        .set(
            &format!("users/{USER}/projects/{PROJECT}"),
            json!({"is_selected": true}),
        )
        .await
        .unwrap();

    let mut config = Config::for_testing("http://worker.test");
    config.extract_backoff = Duration::ZERO;
    let services = Services::new(
        config,
        blobs.clone(),
        records.clone(),
        queue.clone(),
        index.clone(),
        chat,
    );
    Harness {
        services,
        blobs,
        records,
        queue,
        index,
    }
}

async fn seed_page_images(harness: &Harness, pages: u32) {
    for page in 0..pages {
        harness
            .blobs
            .put(
                &format!("{USER}/projects/{PROJECT}/image/{FILE}/{page}"),
                vec![0xFF, 0xD8, page as u8],
                "image/jpeg",
            )
            .await
            .unwrap();
    }
}

fn page_payload(page_number: u32, max_page_number: u32) -> Value {
    serde_json::to_value(PageMetadata {
        user_id: USER.to_string(),
        project_id: PROJECT.to_string(),
        file_uuid: FILE.to_string(),
        file_name: "results.pdf".to_string(),
        page_number,
        max_page_number,
    })
    .unwrap()
}

fn analyst_response(page: u32) -> Value {
    json!({
        "facts": format!("Facts from page {page}."),
        "issues": "None observed.",
        "rationale": "n/a",
        "forecast": "Stable.",
        "investigation": "Nothing further.",
    })
}

fn transcription_response(page: u32) -> Value {
    json!({ "transcription": format!("page {page}") })
}

fn aggregation_tasks(queue: &MemoryTaskQueue) -> usize {
    queue
        .snapshot()
        .iter()
        .filter(|task| task.url.ends_with("/worker/analyst:analyze"))
        .count()
}

#[tokio::test]
async fn fan_in_fires_only_after_the_last_page() {
    let mut responses = Vec::new();
    for page in 0..3 {
        responses.push(Ok(analyst_response(page)));
        responses.push(Ok(transcription_response(page)));
    }
    let harness = harness(responses).await;
    seed_page_images(&harness, 3).await;

    for page in 0..3u32 {
        let response = tasks::page::run(&harness.services, page_payload(page, 3))
            .await
            .unwrap();
        assert_eq!(response, WorkerResponse::success(page));
        let expected = if page == 2 { 1 } else { 0 };
        assert_eq!(aggregation_tasks(&harness.queue), expected);
    }

    // Every page was persisted and indexed.
    for page in 0..3 {
        let doc = harness
            .records
            .get(&format!(
                "users/{USER}/projects/{PROJECT}/documents/{FILE}/pages/{page}"
            ))
            .await
            .unwrap()
            .expect("page record should exist");
        assert_eq!(doc["transcription"], json!(format!("page {page}")));
        assert_eq!(doc["file_name"], json!("results.pdf"));
    }
    assert_eq!(harness.index.pages().len(), 3);

    let tasks = harness.queue.snapshot();
    let analyst = tasks
        .iter()
        .find(|task| task.url.ends_with("/worker/analyst:analyze"))
        .unwrap();
    assert_eq!(analyst.payload["file_uuid"], json!(FILE));
    assert_eq!(analyst.payload["project_id"], json!(PROJECT));
}

#[tokio::test]
async fn fan_in_fires_exactly_once_out_of_order() {
    let mut responses = Vec::new();
    for _ in 0..3 {
        responses.push(Ok(analyst_response(0)));
        responses.push(Ok(transcription_response(0)));
    }
    let harness = harness(responses).await;
    seed_page_images(&harness, 3).await;

    for page in [2u32, 0, 1] {
        tasks::page::run(&harness.services, page_payload(page, 3))
            .await
            .unwrap();
    }
    assert_eq!(aggregation_tasks(&harness.queue), 1);
}

#[tokio::test]
async fn missing_page_image_is_skipped_without_redelivery() {
    let harness = harness(vec![]).await;
    // No images seeded at all.
    let response = tasks::page::run(&harness.services, page_payload(1, 3))
        .await
        .unwrap();
    match response {
        WorkerResponse::Message { message } => {
            assert!(message.starts_with("Skipping page 1 because"), "{message}");
        }
        other => panic!("expected a skip, got {other:?}"),
    }
    assert_eq!(aggregation_tasks(&harness.queue), 0);
}

#[tokio::test]
async fn exhausted_extraction_retries_become_a_skip() {
    // Three attempts, all returning schema-invalid output.
    let responses = (0..3).map(|_| Ok(json!({"nonsense": true}))).collect();
    let harness = harness(responses).await;
    seed_page_images(&harness, 1).await;

    let response = tasks::page::run(&harness.services, page_payload(0, 1))
        .await
        .unwrap();
    match response {
        WorkerResponse::Message { message } => {
            assert!(message.contains("after 3 attempts"), "{message}");
        }
        other => panic!("expected a skip, got {other:?}"),
    }
    // The page never completed, so aggregation never fires.
    assert_eq!(aggregation_tasks(&harness.queue), 0);
}

#[tokio::test]
async fn projection_persists_metrics_and_suppresses_empty_records() {
    let extraction = json!({
        "steps": [
            {"explanation": "Read the revenue table.", "output": "revenue 5,000,000"},
        ],
        "business_summaries": [
            {
                "period": {"year": 2024, "month": 6, "quarter": null, "type": "月次"},
                "business_scope": null,
                "profit_and_loss": {"revenue": 5000000},
                "saas_revenue_metrics": null,
                "saas_customer_metrics": null,
            },
            // All-null record, must be suppressed.
            {
                "period": {"year": 2024, "month": 6, "quarter": null, "type": "月次"},
                "business_scope": null,
                "profit_and_loss": null,
                "saas_revenue_metrics": null,
                "saas_customer_metrics": null,
            },
        ],
    });
    let harness = harness(vec![Ok(extraction)]).await;
    seed_page_images(&harness, 1).await;

    let response = tasks::projection::run(&harness.services, page_payload(0, 1))
        .await
        .unwrap();
    assert_eq!(response, WorkerResponse::success(0));

    let options = harness
        .records
        .list(&format!(
            "users/{USER}/projects/{PROJECT}/projection/period/year/2024/month/6/option"
        ))
        .await
        .unwrap();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].1["profit_and_loss"]["revenue"], json!("5000000"));
    assert_eq!(options[0].1["page_number"], json!(0));
}

#[tokio::test]
async fn projection_failures_skip_instead_of_redelivering() {
    let harness = harness(vec![]).await;
    // No image for this page.
    let response = tasks::projection::run(&harness.services, page_payload(4, 5))
        .await
        .unwrap();
    match response {
        WorkerResponse::Message { message } => {
            assert!(message.starts_with("Skipping page 4 because"), "{message}");
        }
        other => panic!("expected a skip, got {other:?}"),
    }
}

#[tokio::test]
async fn summary_task_stores_document_info() {
    let info = json!({
        "abstract": "FY2024 results deck for a SaaS vendor.",
        "feature": "Monthly revenue breakdown by product line.",
        "extractable_info": ["revenue", "mrr"],
        "year_info": "2023-2024",
        "period_type": "monthly",
        "category": "financial results",
        "category_ir": "earnings presentation",
    });
    let harness = harness(vec![Ok(info)]).await;

    let payload = json!({
        "user_id": USER,
        "file_uuid": FILE,
        "file_name": "results.pdf",
        "summary_text": "FY2024 Financial Results ...",
    });
    let response = tasks::summary::run(&harness.services, payload).await.unwrap();
    assert_eq!(
        response,
        WorkerResponse::message("Summary analysis completed for results.pdf")
    );

    let doc = harness
        .records
        .get(&format!("users/{USER}/projects/{PROJECT}/documents/{FILE}"))
        .await
        .unwrap()
        .expect("document record should exist");
    assert_eq!(doc["abstract"], json!("FY2024 results deck for a SaaS vendor."));
    assert_eq!(doc["file_name"], json!("results.pdf"));
    assert_eq!(doc["file_uuid"], json!(FILE));
}

#[tokio::test]
async fn aggregation_joins_transcriptions_in_page_order() {
    let harness = harness(vec![Ok(json!("A thorough analyst report."))]).await;
    for page in [1u32, 0] {
        harness
            .records
            .set(
                &format!(
                    "users/{USER}/projects/{PROJECT}/documents/{FILE}/pages/{page}"
                ),
                json!({
                    "page_number": page,
                    "transcription": format!("page {page}"),
                }),
            )
            .await
            .unwrap();
    }

    let payload = json!({
        "user_id": USER,
        "project_id": PROJECT,
        "file_uuid": FILE,
        "file_name": "results.pdf",
    });
    let response = tasks::analyst::run(&harness.services, payload).await.unwrap();
    assert_eq!(
        response,
        WorkerResponse::message("Analyst report completed for results.pdf")
    );

    let report = harness
        .records
        .get(&format!(
            "users/{USER}/projects/{PROJECT}/documents/{FILE}/analyst_report/summary"
        ))
        .await
        .unwrap()
        .expect("aggregate report should exist");
    assert_eq!(report["report"], json!("A thorough analyst report."));
}

#[tokio::test]
async fn redelivered_aggregation_overwrites_the_same_record() {
    // At-least-once delivery can run the aggregation twice; both runs
    // must converge on one stored report.
    let harness = harness(vec![
        Ok(json!("A thorough analyst report.")),
        Ok(json!("A thorough analyst report.")),
    ])
    .await;
    harness
        .records
        .set(
            &format!("users/{USER}/projects/{PROJECT}/documents/{FILE}/pages/0"),
            json!({
                "page_number": 0,
                "transcription": "page 0",
            }),
        )
        .await
        .unwrap();

    let payload = json!({
        "user_id": USER,
        "project_id": PROJECT,
        "file_uuid": FILE,
        "file_name": "results.pdf",
    });
    for _ in 0..2 {
        let response = tasks::analyst::run(&harness.services, payload.clone())
            .await
            .unwrap();
        assert_eq!(
            response,
            WorkerResponse::message("Analyst report completed for results.pdf")
        );
    }

    let reports = harness
        .records
        .list(&format!(
            "users/{USER}/projects/{PROJECT}/documents/{FILE}/analyst_report"
        ))
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1, json!({"report": "A thorough analyst report."}));
}

#[tokio::test]
async fn aggregation_with_no_pages_is_a_no_op_message() {
    let harness = harness(vec![]).await;
    let payload = json!({
        "user_id": USER,
        "project_id": PROJECT,
        "file_uuid": FILE,
        "file_name": "results.pdf",
    });
    let response = tasks::analyst::run(&harness.services, payload).await.unwrap();
    assert_eq!(
        response,
        WorkerResponse::message("No transcriptions found for results.pdf")
    );
}

#[tokio::test]
#[ignore = "Requires poppler-utils to be installed"]
async fn separation_stores_images_and_fans_out() {
    let harness = harness(vec![]).await;
    let pdf_bytes = tokio::fs::read("tests/fixtures/two_pages.pdf").await.unwrap();
    harness
        .blobs
        .put("uploads/results.pdf", pdf_bytes, "application/pdf")
        .await
        .unwrap();

    let payload = json!({
        "user_id": USER,
        "project_id": PROJECT,
        "gcs_path": "uploads/results.pdf",
        "filename": "results.pdf",
        "file_uuid": FILE,
    });
    let response = tasks::separate::run(&harness.services, payload).await.unwrap();
    assert_eq!(
        response,
        WorkerResponse::message("Separated results.pdf into 2 pages")
    );

    // Both page images stored as JPEG.
    for page in 0..2 {
        let image = harness
            .blobs
            .get(&format!("{USER}/projects/{PROJECT}/image/{FILE}/{page}"))
            .await
            .unwrap()
            .expect("page image should exist");
        assert_eq!(&image[0..2], &[0xFF, 0xD8]);
    }

    // 1 summary + 2 pages x (analysis + projection).
    let tasks = harness.queue.drain();
    let urls: Vec<_> = tasks.iter().map(|task| task.url.as_str()).collect();
    assert_eq!(
        urls.iter()
            .filter(|url| url.ends_with("/worker/summary:analyze"))
            .count(),
        1
    );
    assert_eq!(
        urls.iter()
            .filter(|url| url.ends_with("/worker/page:analyze"))
            .count(),
        2
    );
    assert_eq!(
        urls.iter()
            .filter(|url| url.ends_with("/worker/projection:analyze"))
            .count(),
        2
    );
    let page_task = tasks
        .iter()
        .find(|task| task.url.ends_with("/worker/page:analyze"))
        .unwrap();
    assert_eq!(page_task.payload["max_page_number"], json!(2));
}
