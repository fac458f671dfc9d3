//! Messages pushed to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub identity: Uuid,
    pub filename: String,
    pub package_url: String,
    pub timestamp: DateTime<Utc>,
}

/// Closed set of events, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NotificationEvent {
    ProcessingStarted {
        identity: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    VideoProcessed {
        identity: Uuid,
        package_url: String,
    },
    ProcessingError {
        identity: Uuid,
        error: String,
    },
    UploadProgress {
        percent: f64,
    },
    #[serde(rename_all = "camelCase")]
    LocalVideoProcessed {
        video_info: VideoInfo,
    },
}
