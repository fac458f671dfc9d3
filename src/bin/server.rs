//! hlsd server - single-host deployment
//!
//! Wires up:
//! - Filesystem adapters (uploads, claim markers, local library)
//! - ffprobe/ffmpeg subprocess adapters
//! - Catalog, claim manager, orchestrator, ingest pool and reconciliation scanner
//! - HTTP query API and the observer WebSocket

use anyhow::Context;
use hlsd::adapters::local::{
    FfmpegEncoder, FfprobeProber, FsClaimStore, FsUploadStore, LocalLibrary, NotificationBus,
};
use hlsd::application::catalog::CATALOG_FILE;
use hlsd::application::{Catalog, ClaimManager, IngestService, Orchestrator, Scanner};
use hlsd::http::{router, AppState};
use hlsd::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,hlsd=debug")),
        )
        .init();

    for dir in [
        &config.uploads_dir,
        &config.local_videos_dir,
        &config.streams_dir,
        &config.claims_dir,
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let shutdown = CancellationToken::new();

    // 1. Adapters
    let uploads = Arc::new(FsUploadStore::new(&config.uploads_dir));
    let claim_store = Arc::new(FsClaimStore::new(&config.claims_dir));
    let prober = Arc::new(FfprobeProber::new(&config.ffprobe_path));
    let encoder = Arc::new(FfmpegEncoder::new(&config.ffmpeg_path, config.encode_timeout));
    let bus = Arc::new(NotificationBus::new(config.outbound_queue_capacity));

    // 2. Application services
    let catalog = Arc::new(
        Catalog::open(config.streams_dir.join(CATALOG_FILE))
            .await
            .context("failed to load the catalog")?,
    );
    let claims = Arc::new(ClaimManager::new(claim_store, config.claim_ttl));
    let orchestrator = Arc::new(Orchestrator::new(
        prober,
        encoder,
        catalog.clone(),
        claims.clone(),
        bus.clone(),
        uploads.clone(),
        &config.streams_dir,
        config.public_streams_prefix.clone(),
    ));
    let ingest = Arc::new(IngestService::new(
        orchestrator,
        catalog.clone(),
        claims.clone(),
        config.max_concurrent_transcodes,
        shutdown.clone(),
    ));
    let scanner = Arc::new(Scanner::new(
        uploads,
        catalog.clone(),
        claims,
        ingest.clone(),
        config.failed_retry_delay,
    ));

    // 3. Background tasks
    let scan_task = scanner
        .clone()
        .spawn(config.scan_interval, shutdown.child_token());
    let heartbeat_task = bus
        .clone()
        .spawn_heartbeat(config.heartbeat_interval, shutdown.child_token());

    // 4. HTTP layer
    let app = router(AppState {
        ingest: ingest.clone(),
        scanner,
        catalog,
        bus: bus.clone(),
        library: LocalLibrary::new(&config.local_videos_dir),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(
        address = %config.bind_address(),
        max_concurrent = config.max_concurrent_transcodes,
        "listening"
    );

    let server_shutdown = shutdown.clone();
    let observers = bus.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for shutdown signal: {}", e);
            }
            info!("shutting down");
            server_shutdown.cancel();
            // Upgraded observer sockets are connections too
            observers.close_all();
        })
        .await
        .context("server error")?;

    // 5. Drain
    shutdown.cancel();
    ingest.shutdown().await;
    let _ = tokio::join!(scan_task, heartbeat_task);
    info!("stopped");
    Ok(())
}
