use crate::domain::attempt::{is_valid_key, ProcessingAttempt};
use crate::ports::claims::{ClaimError, ClaimStore};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

const MARKER_EXTENSION: &str = "claim";

/// Claim markers as JSON files, one per source key.
#[derive(Debug, Clone)]
pub struct FsClaimStore {
    dir: PathBuf,
}

impl FsClaimStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn marker_path(&self, key: &str) -> Result<PathBuf, ClaimError> {
        if !is_valid_key(key) {
            return Err(ClaimError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", key, MARKER_EXTENSION)))
    }

    /// Fully written scratch file next to the markers, never listed.
    async fn write_scratch(&self, attempt: &ProcessingAttempt) -> Result<PathBuf, ClaimError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let scratch = self
            .dir
            .join(format!(".{}.{}.tmp", attempt.source_key, Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(attempt).map_err(|source| ClaimError::Corrupt {
            key: attempt.source_key.clone(),
            source,
        })?;
        tokio::fs::write(&scratch, json).await?;
        Ok(scratch)
    }
}

#[async_trait]
impl ClaimStore for FsClaimStore {
    async fn create(&self, attempt: &ProcessingAttempt) -> Result<bool, ClaimError> {
        let marker = self.marker_path(&attempt.source_key)?;
        let scratch = self.write_scratch(attempt).await?;

        // hard_link refuses to replace an existing marker, and the marker is
        // never observable half-written.
        let linked = tokio::fs::hard_link(&scratch, &marker).await;
        let _ = tokio::fs::remove_file(&scratch).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, key: &str) -> Result<Option<ProcessingAttempt>, ClaimError> {
        let marker = self.marker_path(key)?;
        let data = match tokio::fs::read(&marker).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| ClaimError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    async fn store(&self, attempt: &ProcessingAttempt) -> Result<(), ClaimError> {
        let marker = self.marker_path(&attempt.source_key)?;
        let scratch = self.write_scratch(attempt).await?;
        if let Err(e) = tokio::fs::rename(&scratch, &marker).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ClaimError> {
        let marker = self.marker_path(key)?;
        match tokio::fs::remove_file(&marker).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ProcessingAttempt>, ClaimError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut attempts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(MARKER_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match self.load(key).await {
                Ok(Some(attempt)) => attempts.push(attempt),
                Ok(None) => {}
                Err(ClaimError::Corrupt { key, source }) => {
                    // An unreadable marker cannot prove ownership of anything.
                    warn!(key = %key, "removing unreadable claim marker: {source}");
                    self.remove(&key).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(attempts)
    }
}
