//! Task-queue workers for a document-ingestion and business-analytics
//! backend: split uploaded PDFs into page images, analyze each page with
//! LLM vision calls, persist structured results, and aggregate a final
//! analyst report once every page has been processed.

pub mod config;
pub mod data_url;
pub mod dispatch;
pub mod errors;
pub mod extract;
pub mod llm;
pub mod page_store;
pub mod prelude;
pub mod rasterize;
pub mod rate_limit;
pub mod result_store;
pub mod retry;
pub mod schemas;
pub mod stores;
pub mod tasks;
