//! Application layer - Services that use ports.

pub mod catalog;
pub mod claims;
pub mod handle;
pub mod ingest;
pub mod orchestrator;
pub mod scanner;

pub use catalog::Catalog;
pub use claims::ClaimManager;
pub use ingest::IngestService;
pub use orchestrator::Orchestrator;
pub use scanner::Scanner;
