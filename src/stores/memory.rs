//! In-memory store implementations for tests and local harness runs.

use std::{
    collections::BTreeMap,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use super::{BlobStore, IndexedPage, RecordStore, TaskHandle, TaskQueue, VectorIndex};
use crate::prelude::*;

/// Blob storage backed by a map. Signed URLs are fake but unique per path.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let mut objects = self.objects.lock().map_err(|_| anyhow!("lock poisoned"))?;
        objects.insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let objects = self.objects.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(objects.get(path).map(|(bytes, _)| bytes.clone()))
    }

    async fn signed_url(&self, path: &str, _ttl: Duration) -> Result<Option<String>> {
        let objects = self.objects.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(objects
            .contains_key(path)
            .then(|| format!("memory://signed/{path}")))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(objects
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Record storage backed by a map of slash-separated paths.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, Value>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn set(&self, path: &str, doc: Value) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| anyhow!("lock poisoned"))?;
        records.insert(path.to_string(), doc);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let records = self.records.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(records.get(path).cloned())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let records = self.records.lock().map_err(|_| anyhow!("lock poisoned"))?;
        let prefix = format!("{}/", collection.trim_end_matches('/'));
        Ok(records
            .iter()
            .filter(|(path, _)| {
                // Direct children only, not nested sub-collections.
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(path, doc)| (path.clone(), doc.clone()))
            .collect())
    }

    async fn array_union(&self, path: &str, field: &str, values: &[Value]) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| anyhow!("lock poisoned"))?;
        let record = records
            .entry(path.to_string())
            .or_insert_with(|| json!({}));
        let object = record
            .as_object_mut()
            .ok_or_else(|| anyhow!("record at {path} is not an object"))?;
        let array = object
            .entry(field.to_string())
            .or_insert_with(|| json!([]));
        let array = array
            .as_array_mut()
            .ok_or_else(|| anyhow!("field {field} at {path} is not an array"))?;
        for value in values {
            if !array.contains(value) {
                array.push(value.clone());
            }
        }
        Ok(())
    }
}

/// A recorded enqueue call.
#[derive(Debug, Clone)]
pub struct EnqueuedTask {
    pub url: String,
    pub payload: Value,
}

/// A queue that records tasks instead of delivering them, so tests can
/// drain and replay the fan-out themselves.
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<Vec<EnqueuedTask>>,
    next_id: Mutex<u64>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything enqueued so far.
    pub fn drain(&self) -> Vec<EnqueuedTask> {
        match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        }
    }

    /// Everything enqueued so far, without draining.
    pub fn snapshot(&self) -> Vec<EnqueuedTask> {
        match self.tasks.lock() {
            Ok(tasks) => tasks.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, url: &str, payload: Value) -> Result<TaskHandle> {
        let mut tasks = self.tasks.lock().map_err(|_| anyhow!("lock poisoned"))?;
        tasks.push(EnqueuedTask {
            url: url.to_string(),
            payload,
        });
        let mut next_id = self.next_id.lock().map_err(|_| anyhow!("lock poisoned"))?;
        *next_id += 1;
        Ok(TaskHandle(format!("memory-task-{next_id}")))
    }
}

/// A vector index that just remembers what was added.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    pages: Mutex<Vec<IndexedPage>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(&self) -> Vec<IndexedPage> {
        match self.pages.lock() {
            Ok(pages) => pages.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn add_document(&self, page: IndexedPage) -> Result<()> {
        let mut pages = self.pages.lock().map_err(|_| anyhow!("lock poisoned"))?;
        pages.retain(|existing| {
            !(existing.file_uuid == page.file_uuid
                && existing.page_number == page.page_number)
        });
        pages.push(page);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_list_returns_direct_children_only() {
        let store = MemoryRecordStore::new();
        store
            .set("users/u1/projects/p1", json!({"is_selected": true}))
            .await
            .unwrap();
        store
            .set("users/u1/projects/p2", json!({"is_selected": false}))
            .await
            .unwrap();
        store
            .set("users/u1/projects/p1/documents/f1", json!({"name": "doc"}))
            .await
            .unwrap();

        let children = store.list("users/u1/projects").await.unwrap();
        let paths: Vec<_> = children.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(paths, vec!["users/u1/projects/p1", "users/u1/projects/p2"]);
    }

    #[tokio::test]
    async fn array_union_deduplicates() {
        let store = MemoryRecordStore::new();
        store
            .array_union("progress", "completed_pages", &[json!(0), json!(1)])
            .await
            .unwrap();
        store
            .array_union("progress", "completed_pages", &[json!(1), json!(2)])
            .await
            .unwrap();
        let record = store.get("progress").await.unwrap().unwrap();
        assert_eq!(record["completed_pages"], json!([0, 1, 2]));
    }

    #[tokio::test]
    async fn signed_url_is_none_for_missing_objects() {
        let blobs = MemoryBlobStore::new();
        assert_eq!(
            blobs
                .signed_url("nowhere", Duration::from_secs(60))
                .await
                .unwrap(),
            None
        );
        blobs
            .put("somewhere", b"x".to_vec(), "image/jpeg")
            .await
            .unwrap();
        assert!(
            blobs
                .signed_url("somewhere", Duration::from_secs(60))
                .await
                .unwrap()
                .is_some()
        );
    }
}
