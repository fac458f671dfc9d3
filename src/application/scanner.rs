use super::catalog::{Catalog, VideoState};
use super::claims::ClaimManager;
use super::handle::AttemptHandle;
use super::ingest::{IngestError, IngestRequest, IngestService, SubmitOutcome};
use crate::domain::attempt::{OutputMode, SourceRef};
use crate::ports::claims::ClaimError;
use crate::ports::uploads::{UploadError, UploadStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub orphans_pruned: usize,
    pub stale_pruned: usize,
    pub incomplete: usize,
    pub started: usize,
    pub errors: usize,
}

/// What reconciling one upload led to.
#[derive(Debug)]
pub enum Reconciled {
    Started(AttemptHandle),
    InFlight { identity: Uuid },
    AlreadyProcessed,
    /// A fresh claim exists
    Held,
    /// Failed recently, retried once the cooldown elapses
    CoolingDown,
    Incomplete,
    Missing,
}

impl Reconciled {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::InFlight { .. } => "in-flight",
            Self::AlreadyProcessed => "processed",
            Self::Held => "held",
            Self::CoolingDown => "cooling-down",
            Self::Incomplete => "incomplete",
            Self::Missing => "missing",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Reconciles the upload directory with claims and the catalog.
pub struct Scanner {
    uploads: Arc<dyn UploadStore>,
    catalog: Arc<Catalog>,
    claims: Arc<ClaimManager>,
    ingest: Arc<IngestService>,
    failed_retry_delay: Duration,
}

impl Scanner {
    pub fn new(
        uploads: Arc<dyn UploadStore>,
        catalog: Arc<Catalog>,
        claims: Arc<ClaimManager>,
        ingest: Arc<IngestService>,
        failed_retry_delay: Duration,
    ) -> Self {
        Self {
            uploads,
            catalog,
            claims,
            ingest,
            failed_retry_delay,
        }
    }

    pub fn spawn(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.scan_once().await;
                        if report != ScanReport::default() {
                            info!(?report, "scan finished");
                        }
                    }
                }
            }
            debug!("scanner stopped");
        })
    }

    pub async fn scan_once(&self) -> ScanReport {
        let mut report = ScanReport::default();
        self.prune_claims(&mut report).await;

        let ids = match self.uploads.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("failed to list uploads: {}", e);
                report.errors += 1;
                return report;
            }
        };

        for id in ids {
            match self.reconcile(&id).await {
                Ok(Reconciled::Started(_)) => report.started += 1,
                Ok(Reconciled::Incomplete) => report.incomplete += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(upload = %id, "reconcile failed: {}", e);
                    report.errors += 1;
                }
            }
        }
        report
    }

    async fn prune_claims(&self, report: &mut ScanReport) {
        let attempts = match self.claims.attempts().await {
            Ok(attempts) => attempts,
            Err(e) => {
                warn!("failed to list claims: {}", e);
                report.errors += 1;
                return;
            }
        };

        let now = Utc::now();
        for attempt in attempts {
            let orphaned = !tokio::fs::try_exists(&attempt.source_path)
                .await
                .unwrap_or(true);
            let stale = self.claims.is_stale(&attempt, now);
            if !orphaned && !stale {
                continue;
            }

            match self.claims.prune(&attempt).await {
                Ok(true) if orphaned => {
                    info!(key = %attempt.source_key, identity = %attempt.identity, "pruned orphaned claim");
                    report.orphans_pruned += 1;
                }
                Ok(true) => {
                    warn!(key = %attempt.source_key, identity = %attempt.identity, "pruned stale claim");
                    self.catalog
                        .mark_failed(&attempt.source_key, attempt.identity, "claim expired")
                        .await;
                    report.stale_pruned += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %attempt.source_key, "failed to prune claim: {}", e);
                    report.errors += 1;
                }
            }
        }
    }

    /// Check one upload and submit it when it is complete and unowned.
    pub async fn reconcile(&self, id: &str) -> Result<Reconciled, ReconcileError> {
        let source = SourceRef::upload(id, self.uploads.path_of(id));

        if let Some(entry) = self.catalog.get(&source.key) {
            match entry.state {
                VideoState::Processing => {
                    return Ok(Reconciled::InFlight {
                        identity: entry.identity,
                    })
                }
                VideoState::Processed => return Ok(Reconciled::AlreadyProcessed),
                VideoState::Failed => {
                    let since = (Utc::now() - entry.updated_at)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    if since < self.failed_retry_delay {
                        return Ok(Reconciled::CoolingDown);
                    }
                }
                VideoState::Unprocessed => {}
            }
        }

        if self.claims.is_held(&source.key).await? {
            return Ok(Reconciled::Held);
        }

        let upload = match self.uploads.inspect(id).await {
            Ok(upload) => upload,
            Err(UploadError::NotFound(_)) => return Ok(Reconciled::Missing),
            Err(UploadError::MissingInfo(_)) => {
                debug!(upload = %id, "no metadata sidecar yet");
                return Ok(Reconciled::Incomplete);
            }
            Err(e) => return Err(e.into()),
        };
        if !upload.is_complete() {
            debug!(
                upload = %id,
                actual = upload.actual_size,
                declared = ?upload.declared_size,
                "upload incomplete"
            );
            return Ok(Reconciled::Incomplete);
        }

        let request = IngestRequest {
            source,
            filename: upload.display_name().to_string(),
            mode: OutputMode::Ladder,
        };
        Ok(match self.ingest.submit(request).await? {
            SubmitOutcome::Started(handle) => Reconciled::Started(handle),
            SubmitOutcome::InFlight { identity } => Reconciled::InFlight { identity },
            SubmitOutcome::AlreadyProcessed(_) => Reconciled::AlreadyProcessed,
            SubmitOutcome::ClaimConflict => Reconciled::Held,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handle::AttemptStatus;
    use crate::domain::attempt::ProcessingAttempt;
    use crate::ports::claims::ClaimStore;
    use crate::testing::{fixed_prober, Harness, ScriptedEncoder};
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_second_scan_starts_nothing() {
        let (encoder, release) = ScriptedEncoder::new().gated();
        let harness = Harness::new(Arc::new(encoder), fixed_prober(1280, 720)).await;
        harness.write_upload("a", b"12345", Some(5)).await;
        harness.write_upload("b", b"123", Some(5)).await;

        let first = harness.scanner.scan_once().await;
        assert_eq!(first.started, 1);
        assert_eq!(first.incomplete, 1);

        let second = harness.scanner.scan_once().await;
        assert_eq!(second.started, 0);
        assert_eq!(second.errors, 0);
        release.cancel();
    }

    #[tokio::test]
    async fn test_processed_upload_is_not_restarted() {
        let encoder = Arc::new(ScriptedEncoder::new());
        let harness = Harness::new(encoder.clone(), fixed_prober(1280, 720)).await;
        harness.write_upload("a", b"12345", Some(5)).await;

        let Reconciled::Started(handle) = harness.scanner.reconcile("a").await.unwrap() else {
            panic!("expected an attempt");
        };
        assert!(matches!(handle.wait().await, AttemptStatus::Succeeded { .. }));

        // The upload was consumed; a leftover copy would still be skipped.
        harness.write_upload("a", b"12345", Some(5)).await;
        assert_eq!(harness.scanner.scan_once().await.started, 0);
        assert_eq!(encoder.encoded().len(), 3);
    }

    #[tokio::test]
    async fn test_stale_claim_is_pruned_and_reclaimed() {
        let (encoder, release) = ScriptedEncoder::new().gated();
        let harness = Harness::new(Arc::new(encoder), fixed_prober(1280, 720)).await;
        let path = harness.write_upload("a", b"12345", Some(5)).await;

        let mut abandoned = ProcessingAttempt::new(&SourceRef::upload("a", path), Uuid::new_v4());
        abandoned.renewed_at = Utc::now() - ChronoDuration::hours(1);
        harness.claim_store.create(&abandoned).await.unwrap();

        let report = harness.scanner.scan_once().await;
        assert_eq!(report.stale_pruned, 1);
        assert_eq!(report.started, 1);

        let attempts = harness.claims.attempts().await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_ne!(attempts[0].identity, abandoned.identity);
        release.cancel();
    }

    #[tokio::test]
    async fn test_orphaned_claim_is_pruned() {
        let harness = Harness::new(Arc::new(ScriptedEncoder::new()), fixed_prober(1280, 720)).await;
        let gone = SourceRef::upload("gone", harness.uploads_dir().join("gone"));
        harness.claims.claim(&gone, Uuid::new_v4()).await.unwrap().unwrap();

        let report = harness.scanner.scan_once().await;
        assert_eq!(report.orphans_pruned, 1);
        assert!(harness.claims.attempts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_and_unannounced_uploads_wait() {
        let harness = Harness::new(Arc::new(ScriptedEncoder::new()), fixed_prober(1280, 720)).await;
        harness.write_upload("deferred", b"12345", None).await;
        tokio::fs::write(harness.uploads_dir().join("bare"), b"x").await.unwrap();

        let report = harness.scanner.scan_once().await;
        assert_eq!(report.incomplete, 2);
        assert_eq!(report.started, 0);
        assert!(harness.claims.attempts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_waits_for_cooldown() {
        let encoder = Arc::new(ScriptedEncoder::new().failing_on("360p"));
        let harness = Harness::new(encoder, fixed_prober(1280, 720)).await;
        harness.write_upload("a", b"12345", Some(5)).await;

        let Reconciled::Started(handle) = harness.scanner.reconcile("a").await.unwrap() else {
            panic!("expected an attempt");
        };
        assert!(matches!(handle.wait().await, AttemptStatus::Failed { .. }));
        assert!(matches!(
            harness.scanner.reconcile("a").await.unwrap(),
            Reconciled::CoolingDown
        ));
    }

    #[tokio::test]
    async fn test_queued_attempt_outlives_claim_ttl() {
        let (encoder, release) = ScriptedEncoder::new().gated();
        let encoder = Arc::new(encoder);
        let harness = Harness::with_limits(
            encoder.clone(),
            fixed_prober(1280, 720),
            Duration::from_secs(3),
            1,
            Duration::ZERO,
        )
        .await;
        harness.write_upload("a", b"12345", Some(5)).await;
        harness.write_upload("b", b"12345", Some(5)).await;

        assert_eq!(harness.scanner.scan_once().await.started, 2);
        tokio::time::sleep(Duration::from_secs(4)).await;

        // "b" is still waiting for the only worker; its claim must not go stale.
        let report = harness.scanner.scan_once().await;
        assert_eq!(report.stale_pruned, 0);
        assert_eq!(report.started, 0);

        release.cancel();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let entries = harness.catalog.list();
                if entries.len() == 2
                    && entries.iter().all(|entry| entry.state == VideoState::Processed)
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("both uploads should be processed");
        assert_eq!(encoder.encoded().len(), 6);
    }
}
