//! Blob paths and access for per-page images and source documents.

use std::{sync::Arc, time::Duration};

use crate::{prelude::*, stores::BlobStore};

/// Where a page image lives in blob storage.
pub fn image_path(user_id: &str, project_id: &str, file_uuid: &str, page: u32) -> String {
    format!("{user_id}/projects/{project_id}/image/{file_uuid}/{page}")
}

/// The prefix under which all of a file's page images live.
pub fn image_prefix(user_id: &str, project_id: &str, file_uuid: &str) -> String {
    format!("{user_id}/projects/{project_id}/image/{file_uuid}/")
}

/// Reads and writes page images through the blob store.
pub struct PageStore {
    blobs: Arc<dyn BlobStore>,
    signed_url_ttl: Duration,
}

impl PageStore {
    pub fn new(blobs: Arc<dyn BlobStore>, signed_url_ttl: Duration) -> Self {
        Self {
            blobs,
            signed_url_ttl,
        }
    }

    /// Store one page image. Overwrites are fine; the path is
    /// deterministic so re-runs converge.
    pub async fn store(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
        page: u32,
        jpeg_bytes: Vec<u8>,
    ) -> Result<String, PipelineError> {
        let path = image_path(user_id, project_id, file_uuid, page);
        self.blobs
            .put(&path, jpeg_bytes, "image/jpeg")
            .await
            .map_err(|source| PipelineError::StorageWrite {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// A signed read URL for one page image. Absent image means the
    /// separation step never produced this page.
    pub async fn signed_url(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
        page: u32,
    ) -> Result<String, PipelineError> {
        let path = image_path(user_id, project_id, file_uuid, page);
        self.blobs
            .signed_url(&path, self.signed_url_ttl)
            .await
            .map_err(|source| PipelineError::StorageRead {
                path: path.clone(),
                source,
            })?
            .ok_or_else(|| PipelineError::NotFound(format!("page image {path}")))
    }

    /// Read one page image back for inline base64 encoding.
    pub async fn fetch_image(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
        page: u32,
    ) -> Result<Vec<u8>, PipelineError> {
        let path = image_path(user_id, project_id, file_uuid, page);
        self.blobs
            .get(&path)
            .await
            .map_err(|source| PipelineError::StorageRead {
                path: path.clone(),
                source,
            })?
            .ok_or_else(|| PipelineError::NotFound(format!("page image {path}")))
    }

    /// Page-image paths for a file, in page order.
    pub async fn list_images(
        &self,
        user_id: &str,
        project_id: &str,
        file_uuid: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let prefix = image_prefix(user_id, project_id, file_uuid);
        let mut paths = self
            .blobs
            .list(&prefix)
            .await
            .map_err(|source| PipelineError::StorageRead {
                path: prefix.clone(),
                source,
            })?;
        // Page numbers are not zero-padded, so sort numerically by suffix.
        paths.sort_by_key(|path| {
            path.rsplit('/')
                .next()
                .and_then(|page| page.parse::<u32>().ok())
                .unwrap_or(u32::MAX)
        });
        Ok(paths)
    }
}
