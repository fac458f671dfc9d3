use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Extension of the sidecar the upload layer writes next to the bytes.
pub const INFO_EXTENSION: &str = "info";

/// Side-channel metadata deposited by the resumable-transfer layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadInfo {
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Declared total size; absent while the length is deferred
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub meta_data: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceUpload {
    pub id: String,
    pub path: PathBuf,
    pub declared_size: Option<u64>,
    pub actual_size: u64,
    pub metadata: HashMap<String, String>,
}

impl SourceUpload {
    pub fn new(id: &str, path: PathBuf, info: UploadInfo, actual_size: u64) -> Self {
        Self {
            id: id.to_string(),
            path,
            declared_size: info.size,
            actual_size,
            metadata: info.meta_data,
        }
    }

    /// The bytes on disk match the declared size.
    pub fn is_complete(&self) -> bool {
        self.declared_size == Some(self.actual_size)
    }

    pub fn display_name(&self) -> &str {
        self.metadata
            .get("filename")
            .map(String::as_str)
            .unwrap_or(&self.id)
    }
}

/// Upload ids name a single file inside the upload directory.
pub fn is_valid_upload_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0'])
        && !id.ends_with(&format!(".{}", INFO_EXTENSION))
}
