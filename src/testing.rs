//! Shared fixtures for unit tests.

use crate::adapters::local::{FsClaimStore, FsUploadStore, LocalLibrary, NotificationBus};
use crate::application::catalog::{Catalog, CATALOG_FILE};
use crate::application::claims::ClaimManager;
use crate::application::ingest::IngestService;
use crate::application::orchestrator::Orchestrator;
use crate::application::scanner::Scanner;
use crate::domain::ladder::Resolution;
use crate::ports::media::{
    EncodeError, EncodeEvent, EncodeJob, Encoder, MockProber, ProbeInfo, Prober,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Encoder that writes a one-segment playlist instead of running ffmpeg.
#[derive(Default)]
pub struct ScriptedEncoder {
    fail_on: Option<String>,
    gate: Option<CancellationToken>,
    jobs: Mutex<Vec<EncodeJob>>,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, variant: &str) -> Self {
        self.fail_on = Some(variant.to_string());
        self
    }

    /// Hold every encode until the returned token is cancelled.
    pub fn gated(mut self) -> (Self, CancellationToken) {
        let gate = CancellationToken::new();
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn jobs(&self) -> Vec<EncodeJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn encoded(&self) -> Vec<String> {
        self.jobs().into_iter().map(|job| job.name).collect()
    }
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    async fn encode(
        &self,
        job: &EncodeJob,
        events: UnboundedSender<EncodeEvent>,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError> {
        self.jobs.lock().unwrap().push(job.clone());
        let _ = events.send(EncodeEvent::Started {
            command_line: format!("scripted {}", job.name),
        });

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = gate.cancelled() => {}
                _ = cancel.cancelled() => return Err(EncodeError::Cancelled),
            }
        }
        if self.fail_on.as_deref() == Some(job.name.as_str()) {
            return Err(EncodeError::Failed {
                status: String::from("exit status: 1"),
                stderr: String::from("scripted failure"),
            });
        }

        let _ = events.send(EncodeEvent::Progress { percent: 50.0 });
        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(EncodeError::Spawn)?;
        tokio::fs::write(job.output_dir.join("segment_000.ts"), b"ts")
            .await
            .map_err(EncodeError::Spawn)?;
        let playlist = format!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:{0}\n#EXTINF:{0}.0,\nsegment_000.ts\n#EXT-X-ENDLIST\n",
            job.segment_secs
        );
        tokio::fs::write(&job.playlist, playlist)
            .await
            .map_err(EncodeError::Spawn)?;
        Ok(())
    }
}

pub fn fixed_prober(width: u32, height: u32) -> MockProber {
    let mut prober = MockProber::new();
    prober.expect_probe().returning(move |_| {
        Ok(ProbeInfo {
            resolution: Resolution::new(width, height),
            duration: 10.0,
        })
    });
    prober
}

/// The whole service wired over temporary directories.
pub struct Harness {
    pub catalog: Arc<Catalog>,
    pub claims: Arc<ClaimManager>,
    pub claim_store: Arc<FsClaimStore>,
    pub bus: Arc<NotificationBus>,
    pub library: LocalLibrary,
    pub orchestrator: Arc<Orchestrator>,
    pub ingest: Arc<IngestService>,
    pub scanner: Arc<Scanner>,
    root: TempDir,
}

impl Harness {
    pub async fn new(encoder: Arc<dyn Encoder>, prober: impl Prober + 'static) -> Self {
        Self::with_limits(
            encoder,
            prober,
            Duration::from_secs(30 * 60),
            2,
            Duration::from_secs(300),
        )
        .await
    }

    pub async fn with_limits(
        encoder: Arc<dyn Encoder>,
        prober: impl Prober + 'static,
        claim_ttl: Duration,
        workers: usize,
        failed_retry_delay: Duration,
    ) -> Self {
        let root = tempfile::tempdir().unwrap();
        for dir in ["uploads", "videos", "streams"] {
            tokio::fs::create_dir_all(root.path().join(dir)).await.unwrap();
        }
        let uploads_dir = root.path().join("uploads");
        let streams_dir = root.path().join("streams");

        let catalog = Arc::new(Catalog::open(streams_dir.join(CATALOG_FILE)).await.unwrap());
        let claim_store = Arc::new(FsClaimStore::new(uploads_dir.join(".claims")));
        let claims = Arc::new(ClaimManager::new(claim_store.clone(), claim_ttl));
        let bus = Arc::new(NotificationBus::new(64));
        let uploads = Arc::new(FsUploadStore::new(&uploads_dir));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(prober),
            encoder,
            catalog.clone(),
            claims.clone(),
            bus.clone(),
            uploads.clone(),
            &streams_dir,
            "/streams",
        ));
        let ingest = Arc::new(IngestService::new(
            orchestrator.clone(),
            catalog.clone(),
            claims.clone(),
            workers,
            CancellationToken::new(),
        ));
        let scanner = Arc::new(Scanner::new(
            uploads,
            catalog.clone(),
            claims.clone(),
            ingest.clone(),
            failed_retry_delay,
        ));

        Self {
            catalog,
            claims,
            claim_store,
            bus,
            library: LocalLibrary::new(root.path().join("videos")),
            orchestrator,
            ingest,
            scanner,
            root,
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.path().join("uploads")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.path().join("videos")
    }

    pub fn streams_dir(&self) -> PathBuf {
        self.root.path().join("streams")
    }

    /// Deposit upload bytes plus a sidecar declaring `declared` bytes.
    pub async fn write_upload(&self, id: &str, bytes: &[u8], declared: Option<u64>) -> PathBuf {
        let path = self.uploads_dir().join(id);
        tokio::fs::write(&path, bytes).await.unwrap();
        let info = serde_json::json!({
            "ID": id,
            "Size": declared,
            "Offset": bytes.len(),
            "MetaData": { "filename": format!("{}.mp4", id) },
        });
        tokio::fs::write(
            self.uploads_dir().join(format!("{}.info", id)),
            serde_json::to_vec(&info).unwrap(),
        )
        .await
        .unwrap();
        path
    }

    pub async fn write_local(&self, filename: &str) -> PathBuf {
        let path = self.videos_dir().join(filename);
        tokio::fs::write(&path, b"local video").await.unwrap();
        path
    }
}
