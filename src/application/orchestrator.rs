use super::catalog::Catalog;
use super::claims::{ClaimManager, Renewal};
use super::handle::{AttemptReporter, AttemptStatus};
use crate::adapters::local::events::NotificationBus;
use crate::domain::attempt::{OutputMode, ProcessingAttempt, SourceKind, SourceRef};
use crate::domain::events::{NotificationEvent, VideoInfo};
use crate::domain::hls::{MasterPlaylist, PackageLayout, MASTER_PLAYLIST, MEDIA_PLAYLIST};
use crate::domain::ladder::{
    QualityLadder, QualityVariant, Rendition, LADDER_SEGMENT_SECS, SINGLE_SEGMENT_SECS,
};
use crate::ports::claims::ClaimError;
use crate::ports::media::{EncodeError, EncodeEvent, EncodeJob, Encoder, ProbeError, Prober};
use crate::ports::uploads::UploadStore;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("encoding {variant} failed: {source}")]
    Encode {
        variant: String,
        #[source]
        source: EncodeError,
    },
    #[error("package I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("claim store error: {0}")]
    Claim(#[from] ClaimError),
    #[error("claim lost to another attempt")]
    ClaimLost,
    #[error("attempt cancelled")]
    Cancelled,
}

/// A claimed source ready to be packaged.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub attempt: ProcessingAttempt,
    pub source: SourceRef,
    /// Name reported to observers and stored in the catalog
    pub filename: String,
    pub mode: OutputMode,
}

pub struct Orchestrator {
    prober: Arc<dyn Prober>,
    encoder: Arc<dyn Encoder>,
    ladder: QualityLadder,
    catalog: Arc<Catalog>,
    claims: Arc<ClaimManager>,
    bus: Arc<NotificationBus>,
    uploads: Arc<dyn UploadStore>,
    streams_dir: PathBuf,
    public_prefix: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prober: Arc<dyn Prober>,
        encoder: Arc<dyn Encoder>,
        catalog: Arc<Catalog>,
        claims: Arc<ClaimManager>,
        bus: Arc<NotificationBus>,
        uploads: Arc<dyn UploadStore>,
        streams_dir: impl Into<PathBuf>,
        public_prefix: impl Into<String>,
    ) -> Self {
        Self {
            prober,
            encoder,
            ladder: QualityLadder::default(),
            catalog,
            claims,
            bus,
            uploads,
            streams_dir: streams_dir.into(),
            public_prefix: public_prefix.into(),
        }
    }

    /// Public URL of the package an attempt produces.
    pub fn package_url(&self, identity: Uuid, mode: OutputMode) -> String {
        let playlist = match mode {
            OutputMode::Ladder => MASTER_PLAYLIST,
            OutputMode::SingleQuality => MEDIA_PLAYLIST,
        };
        format!(
            "{}/{}/{}",
            self.public_prefix.trim_end_matches('/'),
            identity,
            playlist
        )
    }

    /// Drive one attempt to success or failure. `renewal` keeps the claim fresh
    /// until encoding ends; the claim is released either way if still owned.
    pub async fn run(
        &self,
        job: TranscodeJob,
        reporter: AttemptReporter,
        cancel: CancellationToken,
        renewal: Renewal,
    ) -> Result<String, AttemptError> {
        let span = info_span!(
            "transcode",
            identity = %job.attempt.identity,
            source = %job.source.name
        );

        async move {
            let result = self.transcode(&job, &reporter, &cancel).await;
            renewal.stop().await;

            let owned = match self.claims.prune(&job.attempt).await {
                Ok(owned) => owned,
                Err(e) => {
                    warn!("failed to release claim: {}", e);
                    true
                }
            };
            let result = match result {
                Ok(_) | Err(AttemptError::Cancelled) if !owned => Err(AttemptError::ClaimLost),
                result => result,
            };

            match result {
                Ok(package_url) => {
                    self.finalize(&job, &package_url).await;
                    reporter.report(AttemptStatus::Succeeded {
                        package_url: package_url.clone(),
                    });
                    Ok(package_url)
                }
                Err(e) => {
                    self.abort(&job, &e).await;
                    reporter.report(AttemptStatus::Failed {
                        error: e.to_string(),
                    });
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn transcode(
        &self,
        job: &TranscodeJob,
        reporter: &AttemptReporter,
        cancel: &CancellationToken,
    ) -> Result<String, AttemptError> {
        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }
        let identity = job.attempt.identity;
        if !self.claims.renew(&job.source.key, identity).await? {
            return Err(AttemptError::ClaimLost);
        }
        let probe = self.prober.probe(&job.source.path).await?;
        if !probe.resolution.is_encodable() {
            return Err(ProbeError::InvalidDimensions {
                width: probe.resolution.width.into(),
                height: probe.resolution.height.into(),
            }
            .into());
        }
        debug!(
            resolution = %probe.resolution,
            duration = probe.duration,
            "probed source"
        );

        let layout = PackageLayout::new(&self.streams_dir, identity);
        tokio::fs::create_dir_all(layout.root()).await?;

        let plan: Vec<(Rendition, PathBuf, u32)> = match job.mode {
            OutputMode::Ladder => {
                let renditions = self.ladder.resolve(probe.resolution);
                MasterPlaylist::from_renditions(&renditions)
                    .write_to(&layout.master_playlist())
                    .await?;
                renditions
                    .into_iter()
                    .map(|rendition| {
                        let dir = layout.variant_dir(&rendition.variant.name);
                        (rendition, dir, LADDER_SEGMENT_SECS)
                    })
                    .collect()
            }
            OutputMode::SingleQuality => vec![(
                Rendition::resolve(&QualityVariant::single(), probe.resolution),
                layout.root().to_path_buf(),
                SINGLE_SEGMENT_SECS,
            )],
        };

        let mut started = false;
        for (rendition, dir, segment_secs) in plan {
            tokio::fs::create_dir_all(&dir).await?;
            let encode_job = EncodeJob::for_rendition(
                &job.source.path,
                dir,
                &rendition,
                segment_secs,
                probe.duration,
            );
            info!(variant = %encode_job.name, resolution = %encode_job.resolution, "encoding variant");
            self.encode_variant(job, &encode_job, reporter, &mut started, cancel)
                .await?;
        }

        Ok(self.package_url(identity, job.mode))
    }

    async fn encode_variant(
        &self,
        job: &TranscodeJob,
        encode_job: &EncodeJob,
        reporter: &AttemptReporter,
        started: &mut bool,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let encode = self.encoder.encode(encode_job, tx, cancel.clone());
        tokio::pin!(encode);

        let result = loop {
            tokio::select! {
                result = &mut encode => break result,
                Some(event) = rx.recv() => {
                    self.on_encode_event(job, &encode_job.name, event, reporter, started).await;
                }
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.on_encode_event(job, &encode_job.name, event, reporter, started)
                .await;
        }

        result.map_err(|source| match source {
            EncodeError::Cancelled => AttemptError::Cancelled,
            source => AttemptError::Encode {
                variant: encode_job.name.clone(),
                source,
            },
        })
    }

    async fn on_encode_event(
        &self,
        job: &TranscodeJob,
        variant: &str,
        event: EncodeEvent,
        reporter: &AttemptReporter,
        started: &mut bool,
    ) {
        match event {
            EncodeEvent::Started { command_line } => {
                debug!(variant, %command_line, "encoder started");
                if !*started {
                    *started = true;
                    let identity = job.attempt.identity;
                    match self.claims.mark_running(&job.source.key, identity).await {
                        Ok(true) => {}
                        Ok(false) => warn!("claim marker missing when marking running"),
                        Err(e) => warn!("failed to mark claim running: {}", e),
                    }
                    self.bus
                        .broadcast(&NotificationEvent::ProcessingStarted { identity });
                }
                reporter.report(AttemptStatus::Running {
                    variant: variant.to_string(),
                    percent: 0.0,
                });
            }
            EncodeEvent::Progress { percent } => {
                debug!(variant, percent, "encode progress");
                reporter.report(AttemptStatus::Running {
                    variant: variant.to_string(),
                    percent,
                });
            }
        }
    }

    async fn finalize(&self, job: &TranscodeJob, package_url: &str) {
        let identity = job.attempt.identity;
        if job.source.kind == SourceKind::Upload {
            if let Err(e) = self.uploads.remove(&job.source.name).await {
                warn!("failed to remove processed upload: {}", e);
            }
        }
        self.catalog
            .mark_processed(&job.source.key, identity, package_url)
            .await;

        let event = match job.source.kind {
            SourceKind::Upload => NotificationEvent::VideoProcessed {
                identity,
                package_url: package_url.to_string(),
            },
            SourceKind::Local => NotificationEvent::LocalVideoProcessed {
                video_info: VideoInfo {
                    identity,
                    filename: job.filename.clone(),
                    package_url: package_url.to_string(),
                    timestamp: Utc::now(),
                },
            },
        };
        let observers = self.bus.broadcast(&event);
        info!(package_url, observers, "package ready");
    }

    /// Partial output is kept on disk.
    async fn abort(&self, job: &TranscodeJob, err: &AttemptError) {
        let identity = job.attempt.identity;
        error!("attempt failed: {}", err);
        self.catalog
            .mark_failed(&job.source.key, identity, &err.to_string())
            .await;
        self.bus.broadcast(&NotificationEvent::ProcessingError {
            identity,
            error: err.to_string(),
        });
    }
}
