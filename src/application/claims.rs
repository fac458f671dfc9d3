use crate::domain::attempt::{is_valid_key, AttemptState, ProcessingAttempt, SourceRef};
use crate::ports::claims::{ClaimError, ClaimStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

/// Background refresh of one attempt's claim marker.
pub struct Renewal {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Renewal {
    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

/// Exactly one live attempt per source, with TTL-based takeover of abandoned claims.
pub struct ClaimManager {
    store: Arc<dyn ClaimStore>,
    ttl: Duration,
    // Serializes every read-modify-write of an existing marker.
    write_lock: Mutex<()>,
}

impl ClaimManager {
    pub fn new(store: Arc<dyn ClaimStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Claim `source` for `identity`. `None` means someone else holds a fresh claim.
    pub async fn claim(
        &self,
        source: &SourceRef,
        identity: Uuid,
    ) -> Result<Option<ProcessingAttempt>, ClaimError> {
        if !is_valid_key(&source.key) {
            return Err(ClaimError::InvalidKey(source.key.clone()));
        }
        let attempt = ProcessingAttempt::new(source, identity);
        if self.store.create(&attempt).await? {
            debug!(key = %attempt.source_key, %identity, "claimed");
            return Ok(Some(attempt));
        }

        let _guard = self.write_lock.lock().await;
        let existing = match self.store.load(&source.key).await {
            Ok(existing) => existing,
            Err(ClaimError::Corrupt { key, source: err }) => {
                warn!(key = %key, "replacing unreadable claim marker: {}", err);
                self.store.remove(&key).await?;
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(existing) = existing {
            if !existing.is_stale(self.ttl, Utc::now()) {
                return Ok(None);
            }
            warn!(
                key = %existing.source_key,
                stale_identity = %existing.identity,
                age_secs = existing.age(Utc::now()).as_secs(),
                "taking over stale claim"
            );
            self.store.remove(&source.key).await?;
        }

        if self.store.create(&attempt).await? {
            debug!(key = %attempt.source_key, %identity, "claimed");
            Ok(Some(attempt))
        } else {
            Ok(None)
        }
    }

    /// Record that encoding has begun. Returns false if the claim was lost.
    pub async fn mark_running(&self, key: &str, identity: Uuid) -> Result<bool, ClaimError> {
        self.update_owned(key, identity, |attempt| {
            attempt.state = AttemptState::Running;
        })
        .await
    }

    /// Refresh the marker so it does not go stale. Returns false if the claim was lost.
    pub async fn renew(&self, key: &str, identity: Uuid) -> Result<bool, ClaimError> {
        self.update_owned(key, identity, |_| {}).await
    }

    async fn update_owned<F>(&self, key: &str, identity: Uuid, update: F) -> Result<bool, ClaimError>
    where
        F: FnOnce(&mut ProcessingAttempt),
    {
        let _guard = self.write_lock.lock().await;
        match self.store.load(key).await? {
            Some(mut attempt) if attempt.identity == identity => {
                update(&mut attempt);
                attempt.renewed_at = Utc::now();
                self.store.store(&attempt).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Renew `attempt`'s marker every TTL/3 until stopped. `on_lost` is cancelled
    /// once the marker belongs to someone else.
    pub fn keep_alive(
        self: &Arc<Self>,
        attempt: &ProcessingAttempt,
        on_lost: CancellationToken,
    ) -> Renewal {
        let claims = self.clone();
        let key = attempt.source_key.clone();
        let identity = attempt.identity;
        let every = (self.ttl / 3).max(Duration::from_secs(1));
        let stop = CancellationToken::new();
        let stopped = stop.clone();

        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stopped.cancelled() => break,
                        _ = ticker.tick() => match claims.renew(&key, identity).await {
                            Ok(true) => debug!(key = %key, %identity, "claim renewed"),
                            Ok(false) => {
                                warn!(key = %key, %identity, "claim lost");
                                on_lost.cancel();
                                break;
                            }
                            Err(e) => warn!(key = %key, "failed to renew claim: {}", e),
                        }
                    }
                }
            }
            .in_current_span(),
        );
        Renewal { stop, task }
    }

    /// Remove the marker for `key` whoever owns it.
    pub async fn release(&self, key: &str) -> Result<(), ClaimError> {
        self.store.remove(key).await
    }

    /// Release `attempt`'s marker unless it has since been replaced.
    pub async fn prune(&self, attempt: &ProcessingAttempt) -> Result<bool, ClaimError> {
        let _guard = self.write_lock.lock().await;
        match self.store.load(&attempt.source_key).await? {
            Some(current) if current.identity == attempt.identity => {
                self.release(&attempt.source_key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// A non-stale claim exists for `key`.
    pub async fn is_held(&self, key: &str) -> Result<bool, ClaimError> {
        Ok(self
            .store
            .load(key)
            .await?
            .is_some_and(|attempt| !self.is_stale(&attempt, Utc::now())))
    }

    pub async fn attempts(&self) -> Result<Vec<ProcessingAttempt>, ClaimError> {
        self.store.list().await
    }

    pub fn is_stale(&self, attempt: &ProcessingAttempt, now: DateTime<Utc>) -> bool {
        attempt.is_stale(self.ttl, now)
    }
}
