use crate::domain::upload::{SourceUpload, UploadInfo, INFO_EXTENSION};
use crate::ports::uploads::{UploadError, UploadStore};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Upload directory laid out as `<id>` bytes next to an `<id>.info` sidecar.
#[derive(Debug, Clone)]
pub struct FsUploadStore {
    root: PathBuf,
}

impl FsUploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn info_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", id, INFO_EXTENSION))
    }
}

#[async_trait]
impl UploadStore for FsUploadStore {
    async fn list_ids(&self) -> Result<Vec<String>, UploadError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(INFO_EXTENSION) {
                continue;
            }
            ids.push(name);
        }
        ids.sort();
        Ok(ids)
    }

    async fn inspect(&self, id: &str) -> Result<SourceUpload, UploadError> {
        let path = self.path_of(id);
        let actual_size = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(UploadError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let raw = match tokio::fs::read(self.info_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(UploadError::MissingInfo(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let info: UploadInfo =
            serde_json::from_slice(&raw).map_err(|source| UploadError::CorruptInfo {
                id: id.to_string(),
                source,
            })?;

        Ok(SourceUpload::new(id, path, info, actual_size))
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    async fn remove(&self, id: &str) -> Result<(), UploadError> {
        for path in [self.path_of(id), self.info_path(id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
