use crate::domain::upload::SourceUpload;
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload {0} not found")]
    NotFound(String),
    #[error("upload {0} has no metadata sidecar")]
    MissingInfo(String),
    #[error("metadata sidecar of upload {id} is unreadable: {source}")]
    CorruptInfo {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("upload store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read side of what the resumable-transfer layer leaves on disk.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Ids of every deposited upload, complete or not.
    async fn list_ids(&self) -> Result<Vec<String>, UploadError>;

    async fn inspect(&self, id: &str) -> Result<SourceUpload, UploadError>;

    fn path_of(&self, id: &str) -> PathBuf;

    /// Delete the bytes and the sidecar.
    async fn remove(&self, id: &str) -> Result<(), UploadError>;
}
