use crate::domain::ladder::Resolution;
use crate::ports::media::{
    EncodeError, EncodeEvent, EncodeJob, Encoder, ProbeError, ProbeInfo, Prober,
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Lines of encoder stderr kept for error reports.
const STDERR_TAIL: usize = 20;

#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<ProbeInfo, ProbeError> {
        let output = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-show_format")
            .arg("-show_streams")
            .arg("-print_format")
            .arg("json")
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_probe_output(&output.stdout)
    }
}

/// Dimensions of the first video stream plus the container duration.
pub fn parse_probe_output(stdout: &[u8]) -> Result<ProbeInfo, ProbeError> {
    let v: Value = serde_json::from_slice(stdout)?;

    let stream = v
        .get("streams")
        .and_then(|streams| streams.as_array())
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some("video"))
        })
        .ok_or(ProbeError::NoVideoStream)?;

    let width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0);
    let height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0);
    if width > u32::MAX as u64 || height > u32::MAX as u64 {
        return Err(ProbeError::InvalidDimensions { width, height });
    }
    let resolution = Resolution::new(width as u32, height as u32);
    if !resolution.is_encodable() {
        return Err(ProbeError::InvalidDimensions { width, height });
    }

    // ffprobe reports durations as strings
    let duration = v
        .get("format")
        .and_then(|format| format.get("duration"))
        .and_then(|d| d.as_f64().or_else(|| d.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0.0);

    Ok(ProbeInfo {
        resolution,
        duration,
    })
}

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout,
        }
    }
}

/// Arguments for a single-rendition HLS encode, progress written to stdout.
pub fn encode_args(job: &EncodeJob) -> Vec<OsString> {
    let bitrate = job.video_bitrate;
    let mut args: Vec<OsString> = ["-hide_banner", "-y", "-nostats", "-progress", "pipe:1", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(job.source.clone().into_os_string());

    #[rustfmt::skip]
    let encoding = [
        "-vf".to_string(), format!("scale={}:{}", job.resolution.width, job.resolution.height),
        "-c:v".to_string(), "libx264".to_string(),
        "-profile:v".to_string(), "main".to_string(),
        "-pix_fmt".to_string(), "yuv420p".to_string(),
        "-preset".to_string(), job.preset.clone(),
        "-force_key_frames".to_string(), format!("expr:gte(t,n_forced*{})", job.segment_secs),
        "-b:v".to_string(), bitrate.to_string(),
        "-maxrate".to_string(), (bitrate / 100 * 107).to_string(),
        "-bufsize".to_string(), (bitrate / 2 * 3).to_string(),
        "-c:a".to_string(), "aac".to_string(),
        "-ac".to_string(), job.audio_channels.to_string(),
        "-b:a".to_string(), job.audio_bitrate.to_string(),
        "-f".to_string(), "hls".to_string(),
        "-hls_time".to_string(), job.segment_secs.to_string(),
        "-hls_playlist_type".to_string(), "vod".to_string(),
        "-hls_segment_filename".to_string(),
    ];
    args.extend(encoding.into_iter().map(OsString::from));
    args.push(job.segment_pattern.clone().into_os_string());
    args.push(job.playlist.clone().into_os_string());
    args
}

/// Seconds of output encoded so far, from an `out_time=HH:MM:SS.micro` progress line.
pub fn parse_out_time(line: &str) -> Option<f64> {
    static OUT_TIME: OnceLock<Regex> = OnceLock::new();
    let re = OUT_TIME.get_or_init(|| {
        Regex::new(r"^out_time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)$").expect("static regex")
    });
    let caps = re.captures(line.trim())?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

async fn forward_progress<R>(stdout: R, duration: f64, events: UnboundedSender<EncodeEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if duration <= 0.0 {
            continue;
        }
        if let Some(done) = parse_out_time(&line) {
            let percent = (done / duration * 100.0).clamp(0.0, 100.0);
            let _ = events.send(EncodeEvent::Progress { percent });
        }
    }
}

async fn collect_stderr<R>(stderr: R) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(target: "hlsd::ffmpeg", "{}", line);
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        job: &EncodeJob,
        events: UnboundedSender<EncodeEvent>,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError> {
        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(EncodeError::Spawn)?;

        let args = encode_args(job);
        let command_line = std::iter::once(self.ffmpeg.as_os_str())
            .chain(args.iter().map(OsString::as_os_str))
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(EncodeError::Spawn)?;

        debug!(variant = %job.name, "started: {}", command_line);
        let _ = events.send(EncodeEvent::Started { command_line });

        let progress = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(forward_progress(stdout, job.duration, events.clone())));
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(collect_stderr(stderr)));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };
        let status = match outcome {
            Outcome::Exited(status) => status.map_err(EncodeError::Spawn)?,
            Outcome::TimedOut => {
                let _ = child.kill().await;
                return Err(EncodeError::TimedOut(self.timeout));
            }
            Outcome::Cancelled => {
                let _ = child.kill().await;
                return Err(EncodeError::Cancelled);
            }
        };

        if let Some(progress) = progress {
            let _ = progress.await;
        }
        let tail = match stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            return Err(EncodeError::Failed {
                status: status.to_string(),
                stderr: tail.join("\n"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ladder::{QualityVariant, Rendition};
    use serde_json::json;

    fn probe_json(streams: Value, duration: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "streams": streams,
            "format": {"duration": duration}
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_probe_output_picks_video_stream() {
        let out = probe_json(
            json!([
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}
            ]),
            json!("12.500000"),
        );
        let info = parse_probe_output(&out).unwrap();
        assert_eq!(info.resolution, Resolution::new(1920, 1080));
        assert_eq!(info.duration, 12.5);
    }

    #[test]
    fn test_parse_probe_output_without_video() {
        let out = probe_json(json!([{"codec_type": "audio"}]), json!("1.0"));
        assert!(matches!(parse_probe_output(&out), Err(ProbeError::NoVideoStream)));
    }

    #[test]
    fn test_parse_probe_output_zero_dimensions() {
        let out = probe_json(
            json!([{"codec_type": "video", "width": 0, "height": null}]),
            json!("1.0"),
        );
        assert!(matches!(
            parse_probe_output(&out),
            Err(ProbeError::InvalidDimensions { width: 0, height: 0 })
        ));

        let out = probe_json(
            json!([{"codec_type": "video", "width": 1, "height": 720}]),
            json!("1.0"),
        );
        assert!(matches!(
            parse_probe_output(&out),
            Err(ProbeError::InvalidDimensions { width: 1, height: 720 })
        ));
    }

    #[test]
    fn test_parse_probe_output_garbage() {
        assert!(matches!(parse_probe_output(b"not json"), Err(ProbeError::Parse(_))));
    }

    #[test]
    fn test_parse_probe_output_missing_duration() {
        let out = serde_json::to_vec(&json!({
            "streams": [{"codec_type": "video", "width": 640, "height": 360}]
        }))
        .unwrap();
        assert_eq!(parse_probe_output(&out).unwrap().duration, 0.0);
    }

    #[test]
    fn test_parse_out_time() {
        assert_eq!(parse_out_time("out_time=00:01:02.500000"), Some(62.5));
        assert_eq!(parse_out_time("out_time=01:00:00.000000\n"), Some(3600.0));
        assert_eq!(parse_out_time("out_time_us=62500000"), None);
        assert_eq!(parse_out_time("progress=continue"), None);
    }

    #[test]
    fn test_encode_args() {
        let rendition = Rendition::resolve(
            &QualityVariant::new("480p", 480, 1_400_000, "veryfast"),
            Resolution::new(1920, 1080),
        );
        let job = EncodeJob::for_rendition(
            Path::new("/in/source.mp4"),
            PathBuf::from("/out/480p"),
            &rendition,
            2,
            10.0,
        );
        let args: Vec<String> = encode_args(&job)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let joined = args.join(" ");

        assert!(joined.contains("-i /in/source.mp4"));
        assert!(joined.contains("-vf scale=852:480"));
        assert!(joined.contains("-profile:v main"));
        assert!(joined.contains("-preset veryfast"));
        assert!(joined.contains("-b:v 1400000"));
        assert!(joined.contains("-ac 2 -b:a 128000"));
        assert!(joined.contains("-hls_time 2"));
        assert!(joined.contains("-hls_segment_filename /out/480p/segment_%03d.ts"));
        assert_eq!(args.last().unwrap(), "/out/480p/playlist.m3u8");
    }
}
