use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "flv", "wmv", "webm", "mpeg", "mpg",
];

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("invalid filename {0:?}")]
    InvalidName(String),
    #[error("unsupported file type {0:?}")]
    UnsupportedExtension(String),
    #[error("video {0:?} not found")]
    NotFound(String),
    #[error("library I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Directory of pre-existing videos that can be packaged on request.
#[derive(Debug, Clone)]
pub struct LocalLibrary {
    root: PathBuf,
}

impl LocalLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// A request filename must be a single plain path component with an allowed extension.
    pub fn validate(filename: &str) -> Result<(), LibraryError> {
        if !is_plain_name(Path::new(filename)) {
            debug!(filename, "rejected filename");
            return Err(LibraryError::InvalidName(filename.to_string()));
        }
        if !has_allowed_extension(filename) {
            return Err(LibraryError::UnsupportedExtension(filename.to_string()));
        }
        Ok(())
    }

    /// Validate `filename` and return the path of an existing regular file.
    pub async fn resolve(&self, filename: &str) -> Result<PathBuf, LibraryError> {
        Self::validate(filename)?;
        let path = self.root.join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(LibraryError::NotFound(filename.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(LibraryError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sorted names of the playable files in the library.
    pub async fn list_videos(&self) -> Result<Vec<String>, LibraryError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') && has_allowed_extension(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn is_plain_name(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn has_allowed_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}
