//! Error taxonomy for the page-processing pipeline.
//!
//! Task handlers decide between "skip this page" and "let the queue
//! redeliver" based on which variant they see. Anything that redelivery
//! cannot fix (a page image that was never produced, an extraction that
//! already exhausted its retries) must stay recoverable so that one bad
//! page never stalls the rest of the file.

use thiserror::Error;

/// Errors produced by the pipeline's own components. External collaborator
/// failures are wrapped into the `Storage*` or `Other` variants at the
/// facade that called them.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The uploaded bytes could not be parsed as a PDF. Terminal for the
    /// whole file.
    #[error("could not read document as a PDF: {0}")]
    DocumentFormat(String),

    /// A page index past the end of the document was requested.
    #[error("page {page} is out of range for a document with {total} pages")]
    InvalidPage { page: usize, total: usize },

    /// A blob-store read failed. Callers must not assume a retry happened.
    #[error("storage read failed for {path}: {source}")]
    StorageRead { path: String, source: anyhow::Error },

    /// A blob-store write failed. Callers must not assume a retry happened.
    #[error("storage write failed for {path}: {source}")]
    StorageWrite { path: String, source: anyhow::Error },

    /// A required object or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Schema-constrained extraction kept failing validation until the
    /// retry ceiling was reached.
    #[error("extraction failed after {attempts} attempts: {source}")]
    ExtractionFailed { attempts: usize, source: anyhow::Error },

    /// A task payload could not be decoded. Redelivering the same bytes
    /// will never succeed.
    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Should a task handler convert this error into a "skipped" response
    /// for a single page, rather than letting the queue redeliver the task?
    pub fn page_recoverable(&self) -> bool {
        match self {
            PipelineError::NotFound(_)
            | PipelineError::StorageRead { .. }
            | PipelineError::ExtractionFailed { .. }
            | PipelineError::InvalidPayload(_) => true,
            PipelineError::DocumentFormat(_)
            | PipelineError::InvalidPage { .. }
            | PipelineError::StorageWrite { .. }
            | PipelineError::Other(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_worthy_errors_are_page_recoverable() {
        assert!(PipelineError::NotFound("page image".to_string()).page_recoverable());
        assert!(
            PipelineError::ExtractionFailed {
                attempts: 3,
                source: anyhow::anyhow!("schema mismatch"),
            }
            .page_recoverable()
        );
        assert!(
            !PipelineError::DocumentFormat("not a PDF".to_string()).page_recoverable()
        );
        assert!(
            !PipelineError::StorageWrite {
                path: "u1/projects/p1/image/f1/0".to_string(),
                source: anyhow::anyhow!("boom"),
            }
            .page_recoverable()
        );
    }
}
