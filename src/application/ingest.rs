use super::catalog::{Catalog, CatalogConflict, CatalogEntry};
use super::claims::ClaimManager;
use super::handle::{attempt_channel, AttemptHandle};
use super::orchestrator::{Orchestrator, TranscodeJob};
use crate::domain::attempt::{OutputMode, SourceRef};
use crate::ports::claims::ClaimError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub source: SourceRef,
    pub filename: String,
    pub mode: OutputMode,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Started(AttemptHandle),
    InFlight { identity: Uuid },
    AlreadyProcessed(CatalogEntry),
    /// A claim marker is held by another owner.
    ClaimConflict,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error("service is shutting down")]
    ShuttingDown,
}

/// Single entry point for scanner, push hook and API: catalog, claim, then the worker pool.
pub struct IngestService {
    orchestrator: Arc<Orchestrator>,
    catalog: Arc<Catalog>,
    claims: Arc<ClaimManager>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl IngestService {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        catalog: Arc<Catalog>,
        claims: Arc<ClaimManager>,
        max_concurrent: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            catalog,
            claims,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    pub fn package_url(&self, identity: Uuid, mode: OutputMode) -> String {
        self.orchestrator.package_url(identity, mode)
    }

    pub async fn submit(&self, request: IngestRequest) -> Result<SubmitOutcome, IngestError> {
        if self.shutdown.is_cancelled() {
            return Err(IngestError::ShuttingDown);
        }
        let IngestRequest {
            source,
            filename,
            mode,
        } = request;
        let identity = Uuid::new_v4();

        let previous = match self.catalog.begin(&source, &filename, identity).await {
            Ok(previous) => previous,
            Err(CatalogConflict::InFlight { identity }) => {
                debug!(key = %source.key, %identity, "already in flight");
                return Ok(SubmitOutcome::InFlight { identity });
            }
            Err(CatalogConflict::AlreadyProcessed(entry)) => {
                return Ok(SubmitOutcome::AlreadyProcessed(entry));
            }
        };

        let attempt = match self.claims.claim(&source, identity).await {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                debug!(key = %source.key, "claim held elsewhere");
                self.catalog.rollback(&source.key, identity, previous).await;
                return Ok(SubmitOutcome::ClaimConflict);
            }
            Err(e) => {
                self.catalog.rollback(&source.key, identity, previous).await;
                return Err(e.into());
            }
        };

        info!(%identity, source = %source.name, "attempt claimed");
        let (reporter, handle) = attempt_channel(identity);
        let job = TranscodeJob {
            attempt,
            source,
            filename,
            mode,
        };

        // Queued attempts keep their claim fresh while they wait for a permit.
        let cancel = self.shutdown.child_token();
        let renewal = self.claims.keep_alive(&job.attempt, cancel.clone());
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            // A cancelled wait still runs the attempt so it is aborted cleanly.
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = permits.acquire_owned() => permit.ok(),
            };
            let _ = orchestrator.run(job, reporter, cancel, renewal).await;
        });

        Ok(SubmitOutcome::Started(handle))
    }

    /// Cancel every attempt and wait for the pool to drain.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("worker pool drained");
    }
}
