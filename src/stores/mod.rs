//! Traits over the external services the pipeline talks to.
//!
//! Each trait covers exactly the operations the tasks need, nothing more.
//! Production wires in cloud-backed implementations; tests and the local
//! harness use the in-memory versions from [`memory`].

use std::time::Duration;

use async_trait::async_trait;

use crate::prelude::*;

pub mod memory;

pub use memory::{
    MemoryBlobStore, MemoryRecordStore, MemoryTaskQueue, MemoryVectorIndex,
};

/// Object storage for page images and uploaded source documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `path`, overwriting any existing object.
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Read the object at `path`, or `None` if absent.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// A time-limited read URL for `path`, or `None` if the object is
    /// absent.
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<Option<String>>;

    /// Paths of all objects under `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Document-oriented record storage, addressed by slash-separated paths.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write `doc` at `path`, replacing any existing record.
    async fn set(&self, path: &str, doc: Value) -> Result<()>;

    /// Read the record at `path`, or `None` if absent.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// All records that are direct children of `collection`, as
    /// `(path, doc)` pairs in path order.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>>;

    /// Append `values` to the array field `field` of the record at `path`,
    /// creating the record if needed. Values already present are not
    /// duplicated.
    async fn array_union(&self, path: &str, field: &str, values: &[Value]) -> Result<()>;
}

/// Opaque identifier for an enqueued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle(pub String);

/// An external at-least-once task queue that delivers payloads back to us
/// over HTTP.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue an HTTP POST of `payload` to `url`.
    async fn enqueue(&self, url: &str, payload: Value) -> Result<TaskHandle>;
}

/// A page transcription handed to the retrieval index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedPage {
    pub user_id: String,
    pub project_id: String,
    pub file_uuid: String,
    pub file_name: String,
    pub page_number: u32,
    pub text: String,
}

/// Retrieval index that later powers chat over the ingested documents.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Add or replace one page's transcription in the index.
    async fn add_document(&self, page: IndexedPage) -> Result<()>;
}
