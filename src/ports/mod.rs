//! Ports - Trait seams between services and adapters.

pub mod claims;
pub mod media;
pub mod uploads;
