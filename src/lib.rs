//! hlsd - Upload to HLS packaging service
//!
//! Hexagonal Architecture:
//! - domain/: Pure types (ladder, attempts, manifests, events, uploads)
//! - ports/: Trait definitions (claim store, upload store, prober, encoder)
//! - adapters/: Concrete implementations (filesystem, ffmpeg, HTTP/WebSocket)
//! - application/: Services (catalog, claims, orchestrator, scanner, ingest)
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use adapters::local::{events, http};
pub use config::Config;
pub use domain::hls;
