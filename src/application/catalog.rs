use crate::domain::attempt::{SourceKind, SourceRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoState {
    Unprocessed,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Claim key of the source, unique across uploads and local files
    pub key: String,
    pub filename: String,
    pub kind: SourceKind,
    pub identity: Uuid,
    pub state: VideoState,
    pub package_url: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogConflict {
    InFlight { identity: Uuid },
    AlreadyProcessed(CatalogEntry),
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog snapshot is unreadable: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Source → processing state, snapshotted to disk after every transition.
#[derive(Debug)]
pub struct Catalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
    snapshot: Option<PathBuf>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl Catalog {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            snapshot: None,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the snapshot at `path` (if any). Attempts interrupted by a restart
    /// come back as failed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let mut entries = HashMap::new();

        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let saved: Vec<CatalogEntry> = serde_json::from_slice(&raw)?;
                for mut entry in saved {
                    if entry.state == VideoState::Processing {
                        warn!(identity = %entry.identity, filename = %entry.filename, "attempt was interrupted");
                        entry.state = VideoState::Failed;
                        entry.error = Some(String::from("interrupted"));
                        entry.updated_at = Utc::now();
                    }
                    entries.insert(entry.key.clone(), entry);
                }
                info!(entries = entries.len(), path = %path.display(), "catalog loaded");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no catalog snapshot, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            entries: RwLock::new(entries),
            snapshot: Some(path),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CatalogEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CatalogEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically move `source` to processing under `identity`.
    ///
    /// Returns the entry that was replaced so a caller that then loses the
    /// claim can [`rollback`](Self::rollback).
    pub async fn begin(
        &self,
        source: &SourceRef,
        filename: &str,
        identity: Uuid,
    ) -> Result<Option<CatalogEntry>, CatalogConflict> {
        let previous = {
            let mut entries = self.write();
            if let Some(existing) = entries.get(&source.key) {
                match existing.state {
                    VideoState::Processing => {
                        return Err(CatalogConflict::InFlight {
                            identity: existing.identity,
                        })
                    }
                    VideoState::Processed => {
                        return Err(CatalogConflict::AlreadyProcessed(existing.clone()))
                    }
                    VideoState::Unprocessed | VideoState::Failed => {}
                }
            }
            entries.insert(
                source.key.clone(),
                CatalogEntry {
                    key: source.key.clone(),
                    filename: filename.to_string(),
                    kind: source.kind,
                    identity,
                    state: VideoState::Processing,
                    package_url: None,
                    error: None,
                    updated_at: Utc::now(),
                },
            )
        };
        self.persist_logged().await;
        Ok(previous)
    }

    /// Undo a `begin` whose claim was not obtained.
    pub async fn rollback(&self, key: &str, identity: Uuid, previous: Option<CatalogEntry>) {
        {
            let mut entries = self.write();
            if entries.get(key).map(|entry| entry.identity) != Some(identity) {
                return;
            }
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
        }
        self.persist_logged().await;
    }

    pub async fn mark_processed(&self, key: &str, identity: Uuid, package_url: &str) -> bool {
        self.transition(key, identity, |entry| {
            entry.state = VideoState::Processed;
            entry.package_url = Some(package_url.to_string());
            entry.error = None;
        })
        .await
    }

    pub async fn mark_failed(&self, key: &str, identity: Uuid, error: &str) -> bool {
        self.transition(key, identity, |entry| {
            entry.state = VideoState::Failed;
            entry.error = Some(error.to_string());
        })
        .await
    }

    /// Apply `update` if the entry still belongs to `identity`.
    async fn transition<F>(&self, key: &str, identity: Uuid, update: F) -> bool
    where
        F: FnOnce(&mut CatalogEntry),
    {
        let applied = {
            let mut entries = self.write();
            match entries.get_mut(key) {
                Some(entry) if entry.identity == identity => {
                    update(entry);
                    entry.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.persist_logged().await;
        } else {
            debug!(key, %identity, "catalog entry moved on, transition skipped");
        }
        applied
    }

    pub fn get(&self, key: &str) -> Option<CatalogEntry> {
        self.read().get(key).cloned()
    }

    pub fn find_by_identity(&self, identity: Uuid) -> Option<CatalogEntry> {
        self.read()
            .values()
            .find(|entry| entry.identity == identity)
            .cloned()
    }

    /// Every entry, ordered by filename.
    pub fn list(&self) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = self.read().values().cloned().collect();
        entries.sort_by(|a, b| a.filename.cmp(&b.filename).then(a.key.cmp(&b.key)));
        entries
    }

    /// Write the snapshot (temp file, then rename). No-op for in-memory catalogs.
    pub async fn persist(&self) -> Result<(), CatalogError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let json = serde_json::to_vec_pretty(&self.list())?;
        write_atomically(path, &json).await?;
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!("failed to persist catalog: {}", e);
        }
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
