//! Configuration loaded from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Service configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Directory where the upload layer deposits bytes and `.info` sidecars
    pub uploads_dir: PathBuf,
    /// Directory of pre-existing local videos that can be processed on request
    pub local_videos_dir: PathBuf,
    /// Root of the generated HLS packages
    pub streams_dir: PathBuf,
    /// Directory holding claim markers
    pub claims_dir: PathBuf,
    /// URL prefix under which `streams_dir` is served
    pub public_streams_prefix: String,
    pub scan_interval: Duration,
    /// Age after which a claim is presumed abandoned
    pub claim_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub max_concurrent_transcodes: usize,
    pub encode_timeout: Duration,
    /// Per-connection outbound queue length before the oldest message is dropped
    pub outbound_queue_capacity: usize,
    /// Cooldown before the scanner retries a failed upload
    pub failed_retry_delay: Duration,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Config {
    /// Load configuration from `.env` and environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let uploads_dir = PathBuf::from(env_or("UPLOADS_DIR", "./uploads"));
        let claims_dir = env::var("CLAIMS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| uploads_dir.join(".claims"));

        Self {
            addr: env_or("ADDR", "127.0.0.1"),
            port: env_or("PORT", "3000"),
            local_videos_dir: PathBuf::from(env_or("LOCAL_VIDEOS_DIR", "./videos")),
            streams_dir: PathBuf::from(env_or("STREAMS_DIR", "./streams")),
            public_streams_prefix: env_or("PUBLIC_STREAMS_PREFIX", "/streams"),
            uploads_dir,
            claims_dir,
            scan_interval: Duration::from_secs(env_parse("SCAN_INTERVAL_SECS", 10)),
            claim_ttl: Duration::from_secs(env_parse("CLAIM_TTL_SECS", 30 * 60)),
            heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_INTERVAL_SECS", 30)),
            max_concurrent_transcodes: env_parse("MAX_CONCURRENT_TRANSCODES", 2usize).max(1),
            encode_timeout: Duration::from_secs(env_parse("ENCODE_TIMEOUT_SECS", 6 * 60 * 60)),
            outbound_queue_capacity: env_parse("OUTBOUND_QUEUE_CAPACITY", 64usize).max(1),
            failed_retry_delay: Duration::from_secs(env_parse("FAILED_RETRY_DELAY_SECS", 300)),
            ffmpeg_path: PathBuf::from(env_or("FFMPEG_PATH", "ffmpeg")),
            ffprobe_path: PathBuf::from(env_or("FFPROBE_PATH", "ffprobe")),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| String::from(default))
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "malformed value, using default {default}");
            default
        }),
        Err(_) => default,
    }
}
