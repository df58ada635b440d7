use std::{path::PathBuf, str::FromStr, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt as _;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use finsight_worker::{
    config::Config,
    dispatch::HttpTaskQueue,
    extract::schema_for,
    llm::OpenAiChat,
    prelude::*,
    schemas::{AnalystReport, DocumentInfo, MetricsExtraction, TranscriptionReport},
    stores::{
        BlobStore as _, MemoryBlobStore, MemoryRecordStore, MemoryTaskQueue,
        MemoryVectorIndex, RecordStore as _, TaskQueue,
    },
    tasks::{self, Services},
};

/// Run document-pipeline worker tasks locally.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - API_BASE_URL: Base URL for our own worker endpoints.
  - OPENAI_API_BASE (optional): Override the LLM server URL.
  - OPENAI_API_KEY: The OpenAI key to use.
  - VISION_MODEL, REPORT_MODEL (optional): Override the default models.
  - LLM_RATE_LIMIT (optional): Client-side LLM rate limit, e.g. "10/s".

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    /// Preload a blob before running, as BLOB_PATH=LOCAL_FILE. May be
    /// repeated.
    #[clap(long = "seed-blob", value_name = "PATH=FILE", global = true)]
    seed_blobs: Vec<String>,

    /// Preload a record before running, as RECORD_PATH=LOCAL_JSON_FILE.
    /// May be repeated.
    #[clap(long = "seed-record", value_name = "PATH=FILE", global = true)]
    seed_records: Vec<String>,

    /// Read the task payload from this file instead of stdin.
    #[clap(long, value_name = "FILE", global = true)]
    payload: Option<PathBuf>,

    /// POST fanned-out tasks to their endpoints over HTTP instead of just
    /// logging them.
    #[clap(long, global = true)]
    deliver: bool,

    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The worker endpoints, as runnable subcommands.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Split an uploaded PDF into page images and fan out page tasks.
    Separate,
    /// Analyze one page: analyst report + transcription.
    Page,
    /// Extract financial metrics from one page.
    Projection,
    /// Classify a document from its heading text.
    Summary,
    /// Aggregate all page transcriptions into one analyst report.
    Analyst,
    /// Print the JSON Schema used for an extraction.
    Schema {
        #[clap(value_enum)]
        name: SchemaName,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SchemaName {
    AnalystReport,
    Transcription,
    FinancialMetrics,
    DocumentInfo,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();
    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main().await
}

#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // The schema subcommand needs no configuration or services.
    if let Cmd::Schema { name } = &opts.subcmd {
        let schema = match name {
            SchemaName::AnalystReport => schema_for::<AnalystReport>()?,
            SchemaName::Transcription => schema_for::<TranscriptionReport>()?,
            SchemaName::FinancialMetrics => schema_for::<MetricsExtraction>()?,
            SchemaName::DocumentInfo => schema_for::<DocumentInfo>()?,
        };
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let config = Config::from_env()?;

    // Local harness: in-memory stores, seeded from the command line, with
    // a real LLM behind them.
    let blobs = Arc::new(MemoryBlobStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let memory_queue = Arc::new(MemoryTaskQueue::new());
    let queue: Arc<dyn TaskQueue> = if opts.deliver {
        Arc::new(HttpTaskQueue::new())
    } else {
        memory_queue.clone()
    };
    let index = Arc::new(MemoryVectorIndex::new());
    for seed in &opts.seed_blobs {
        let (path, file) = split_seed(seed)?;
        let bytes = tokio::fs::read(&file)
            .await
            .with_context(|| format!("failed to read {file:?}"))?;
        blobs.put(path, bytes, "application/octet-stream").await?;
    }
    for seed in &opts.seed_records {
        let (path, file) = split_seed(seed)?;
        let text = tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("failed to read {file:?}"))?;
        let doc: Value = serde_json::from_str(&text)
            .with_context(|| format!("{file:?} is not valid JSON"))?;
        records.set(path, doc).await?;
    }

    let services = Services::new(
        config,
        blobs,
        records,
        queue,
        index,
        Arc::new(OpenAiChat::from_env()),
    );

    let payload = read_payload(&opts).await?;
    let response = match &opts.subcmd {
        Cmd::Separate => tasks::separate::run(&services, payload).await?,
        Cmd::Page => tasks::page::run(&services, payload).await?,
        Cmd::Projection => tasks::projection::run(&services, payload).await?,
        Cmd::Summary => tasks::summary::run(&services, payload).await?,
        Cmd::Analyst => tasks::analyst::run(&services, payload).await?,
        Cmd::Schema { .. } => unreachable!("handled above"),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);

    for task in memory_queue.drain() {
        info!(url = %task.url, "task enqueued (pass --deliver to POST it)");
    }
    Ok(())
}

/// Split a `PATH=FILE` seed argument.
fn split_seed(seed: &str) -> Result<(&str, &str)> {
    seed.split_once('=')
        .ok_or_else(|| anyhow!("expected PATH=FILE, got {seed:?}"))
}

/// Read the task payload from `--payload` or stdin.
async fn read_payload(opts: &Opts) -> Result<Value> {
    let text = match &opts.payload {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {:?}", path.display()))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("failed to read payload from stdin")?;
            text
        }
    };
    serde_json::from_str(&text).context("payload is not valid JSON")
}
