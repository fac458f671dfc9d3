//! Domain layer - Pure business logic.

pub mod attempt;
pub mod events;
pub mod hls;
pub mod ladder;
pub mod upload;
