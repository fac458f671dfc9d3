use crate::domain::ladder::{Rendition, Resolution, AUDIO_BITRATE, AUDIO_CHANNELS};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeInfo {
    pub resolution: Resolution,
    /// Seconds; zero when the container does not report one
    pub duration: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run prober: {0}")]
    Spawn(#[source] io::Error),
    #[error("prober exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("unparseable probe output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("source has no video stream")]
    NoVideoStream,
    #[error("source reports invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u64, height: u64 },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeInfo, ProbeError>;
}

/// Parameters of one encode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    /// Variant name, used for logging and error reports
    pub name: String,
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub playlist: PathBuf,
    pub segment_pattern: PathBuf,
    pub resolution: Resolution,
    pub video_bitrate: u32,
    pub preset: String,
    pub segment_secs: u32,
    pub audio_channels: u8,
    pub audio_bitrate: u32,
    /// Source duration, for progress reporting
    pub duration: f64,
}

impl EncodeJob {
    pub fn for_rendition(
        source: &Path,
        output_dir: PathBuf,
        rendition: &Rendition,
        segment_secs: u32,
        duration: f64,
    ) -> Self {
        Self {
            name: rendition.variant.name.clone(),
            source: source.to_path_buf(),
            playlist: output_dir.join(crate::domain::hls::MEDIA_PLAYLIST),
            segment_pattern: output_dir.join(crate::domain::hls::SEGMENT_PATTERN),
            output_dir,
            resolution: rendition.resolution.even(),
            video_bitrate: rendition.variant.bitrate,
            preset: rendition.variant.preset.clone(),
            segment_secs,
            audio_channels: AUDIO_CHANNELS,
            audio_bitrate: AUDIO_BITRATE,
            duration,
        }
    }
}

/// What the encoder reports while running. Completion and failure are the return value.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeEvent {
    Started { command_line: String },
    Progress { percent: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to run encoder: {0}")]
    Spawn(#[source] io::Error),
    #[error("encoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("encode timed out after {0:?}")]
    TimedOut(Duration),
    #[error("encode cancelled")]
    Cancelled,
}

#[async_trait]
pub trait Encoder: Send + Sync {
    /// Run one encode to completion. A closed `events` channel must not abort the encode.
    async fn encode(
        &self,
        job: &EncodeJob,
        events: UnboundedSender<EncodeEvent>,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError>;
}
