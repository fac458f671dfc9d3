//! Local adapters for single-host deployment.

pub mod events;
pub mod ffmpeg;
pub mod fs;
pub mod http;
pub mod library;
pub mod uploads;

pub use events::bus::NotificationBus;
pub use ffmpeg::{FfmpegEncoder, FfprobeProber};
pub use fs::FsClaimStore;
pub use library::LocalLibrary;
pub use uploads::FsUploadStore;
