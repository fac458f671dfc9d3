use crate::domain::attempt::ProcessingAttempt;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("claim store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("claim marker for {key} is unreadable: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid claim key {0:?}")]
    InvalidKey(String),
}

/// Arena of attempt records keyed by source.
///
/// Implementations must make `create` atomic: of two concurrent calls for the
/// same key, at most one returns `true`.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Insert the record only if no record exists for its key.
    async fn create(&self, attempt: &ProcessingAttempt) -> Result<bool, ClaimError>;

    async fn load(&self, key: &str) -> Result<Option<ProcessingAttempt>, ClaimError>;

    /// Overwrite an existing record (state changes, renewals).
    async fn store(&self, attempt: &ProcessingAttempt) -> Result<(), ClaimError>;

    /// Remove the record. Missing records are not an error.
    async fn remove(&self, key: &str) -> Result<(), ClaimError>;

    async fn list(&self) -> Result<Vec<ProcessingAttempt>, ClaimError>;
}
