//! In-process claim store, for tests and embedding.

use crate::domain::attempt::ProcessingAttempt;
use crate::ports::claims::{ClaimError, ClaimStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryClaimStore {
    records: Mutex<HashMap<String, ProcessingAttempt>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProcessingAttempt>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn create(&self, attempt: &ProcessingAttempt) -> Result<bool, ClaimError> {
        let mut records = self.records();
        if records.contains_key(&attempt.source_key) {
            return Ok(false);
        }
        records.insert(attempt.source_key.clone(), attempt.clone());
        Ok(true)
    }

    async fn load(&self, key: &str) -> Result<Option<ProcessingAttempt>, ClaimError> {
        Ok(self.records().get(key).cloned())
    }

    async fn store(&self, attempt: &ProcessingAttempt) -> Result<(), ClaimError> {
        self.records()
            .insert(attempt.source_key.clone(), attempt.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ClaimError> {
        self.records().remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProcessingAttempt>, ClaimError> {
        Ok(self.records().values().cloned().collect())
    }
}
