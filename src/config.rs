//! Worker configuration, read once from the environment at process start.

use std::{env, str::FromStr, time::Duration};

use crate::{prelude::*, rate_limit::RateLimit};

/// Default cap on the number of pages analyzed per uploaded file.
const DEFAULT_MAX_PAGES_TO_PARSE: usize = 30;

/// Default number of characters of leading text fed to the summary task.
const DEFAULT_HEADING_TEXT_LENGTH: usize = 2000;

/// Configuration for the worker process. Constructed once in `main` and
/// passed by reference; components never reach for ambient globals.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL under which our own worker endpoints are reachable by the
    /// task queue, e.g. `https://api.example.com`.
    pub api_base_url: String,

    /// Upper bound on pages rasterized and analyzed per file.
    pub max_pages_to_parse: usize,

    /// DPI used when rasterizing PDF pages.
    pub rasterize_dpi: u32,

    /// Characters of leading document text used for the lightweight
    /// document summary.
    pub heading_text_length: usize,

    /// Model used for per-page vision extraction.
    pub vision_model: String,

    /// Model used for the long-form aggregate narrative.
    pub report_model: String,

    /// Total attempts allowed per schema-constrained extraction.
    pub extract_max_retries: usize,

    /// Pause between extraction attempts.
    pub extract_backoff: Duration,

    /// Lifetime of signed read URLs for page images.
    pub signed_url_ttl: Duration,

    /// Optional client-side rate limit on LLM requests, e.g. "10/s".
    pub llm_rate_limit: Option<RateLimit>,
}

impl Config {
    /// Build a configuration from environment variables. Anything not set
    /// falls back to a sensible default; only `API_BASE_URL` is required.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_base_url: env::var("API_BASE_URL")
                .context("API_BASE_URL must be set")?
                .trim_end_matches('/')
                .to_string(),
            max_pages_to_parse: parsed_var(
                "MAX_PAGES_TO_PARSE",
                DEFAULT_MAX_PAGES_TO_PARSE,
            )?,
            rasterize_dpi: parsed_var("RASTERIZE_DPI", 150)?,
            heading_text_length: parsed_var(
                "HEADING_TEXT_LENGTH",
                DEFAULT_HEADING_TEXT_LENGTH,
            )?,
            vision_model: env::var("VISION_MODEL")
                .unwrap_or_else(|_| "gpt-4o-2024-08-06".to_string()),
            report_model: env::var("REPORT_MODEL")
                .unwrap_or_else(|_| "o1-2024-12-17".to_string()),
            extract_max_retries: at_least_one(
                "EXTRACT_MAX_RETRIES",
                parsed_var("EXTRACT_MAX_RETRIES", 3)?,
            )?,
            extract_backoff: Duration::from_secs(parsed_var(
                "EXTRACT_BACKOFF_SECONDS",
                2,
            )?),
            signed_url_ttl: Duration::from_secs(parsed_var(
                "SIGNED_URL_TTL_SECONDS",
                3600,
            )?),
            llm_rate_limit: match env::var("LLM_RATE_LIMIT") {
                Ok(value) => Some(RateLimit::from_str(&value)?),
                Err(_) => None,
            },
        })
    }

    /// A configuration suitable for tests and local harness runs.
    pub fn for_testing(api_base_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            max_pages_to_parse: DEFAULT_MAX_PAGES_TO_PARSE,
            rasterize_dpi: 150,
            heading_text_length: DEFAULT_HEADING_TEXT_LENGTH,
            vision_model: "gpt-4o-2024-08-06".to_string(),
            report_model: "o1-2024-12-17".to_string(),
            extract_max_retries: 3,
            extract_backoff: Duration::from_secs(2),
            signed_url_ttl: Duration::from_secs(3600),
            llm_rate_limit: None,
        }
    }
}

/// Read an environment variable and parse it, falling back to a default
/// when unset.
fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("could not parse {name}={value:?}")),
        Err(_) => Ok(default),
    }
}

/// Reject zero at startup; a zero attempt ceiling would leave the retry
/// loop with nothing to run.
fn at_least_one(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(anyhow!("{name} must be at least 1, got 0"));
    }
    Ok(value)
}
