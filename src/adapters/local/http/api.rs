use super::error::ApiError;
use super::AppState;
use crate::application::catalog::{CatalogEntry, VideoState};
use crate::application::ingest::{IngestRequest, SubmitOutcome};
use crate::application::scanner::Reconciled;
use crate::domain::attempt::{OutputMode, SourceKind, SourceRef};
use crate::domain::events::NotificationEvent;
use crate::domain::upload::is_valid_upload_id;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub identity: Uuid,
    pub status: VideoState,
    pub package_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn video_status(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let identity = Uuid::parse_str(&identity)
        .map_err(|_| ApiError::Validation(format!("invalid identity {:?}", identity)))?;
    let entry = state
        .catalog
        .find_by_identity(identity)
        .ok_or_else(|| ApiError::NotFound(format!("unknown identity {}", identity)))?;

    Ok(Json(StatusResponse {
        identity,
        status: entry.state,
        package_url: entry.package_url,
        error: entry.error,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListing {
    pub filename: String,
    pub processed: bool,
    pub status: VideoState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_url: Option<String>,
}

impl From<CatalogEntry> for VideoListing {
    fn from(entry: CatalogEntry) -> Self {
        Self {
            filename: entry.filename,
            processed: entry.state == VideoState::Processed,
            status: entry.state,
            identity: Some(entry.identity),
            package_url: entry.package_url,
        }
    }
}

/// Catalog entries plus local files that were never processed.
pub async fn list_videos(State(state): State<AppState>) -> Result<Json<Vec<VideoListing>>, ApiError> {
    let entries = state.catalog.list();
    let known: HashSet<&str> = entries
        .iter()
        .filter(|entry| entry.kind == SourceKind::Local)
        .map(|entry| entry.filename.as_str())
        .collect();

    let unprocessed: Vec<VideoListing> = state
        .library
        .list_videos()
        .await?
        .into_iter()
        .filter(|filename| !known.contains(filename.as_str()))
        .map(|filename| VideoListing {
            filename,
            processed: false,
            status: VideoState::Unprocessed,
            identity: None,
            package_url: None,
        })
        .collect();

    let mut listing: Vec<VideoListing> = entries.into_iter().map(VideoListing::from).collect();
    listing.extend(unprocessed);
    listing.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(Json(listing))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessLocalRequest {
    pub filename: String,
    #[serde(default)]
    pub single_quality: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessLocalResponse {
    pub identity: Uuid,
    pub filename: String,
    pub package_url: String,
    pub timestamp: DateTime<Utc>,
}

pub async fn process_local(
    State(state): State<AppState>,
    payload: Result<Json<ProcessLocalRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProcessLocalResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let path = state.library.resolve(&request.filename).await?;
    let mode = if request.single_quality {
        OutputMode::SingleQuality
    } else {
        OutputMode::Ladder
    };

    let outcome = state
        .ingest
        .submit(IngestRequest {
            source: SourceRef::local(&request.filename, path),
            filename: request.filename.clone(),
            mode,
        })
        .await?;

    let accepted = |identity: Uuid| {
        (
            StatusCode::ACCEPTED,
            Json(ProcessLocalResponse {
                identity,
                filename: request.filename.clone(),
                package_url: state.ingest.package_url(identity, mode),
                timestamp: Utc::now(),
            }),
        )
    };

    match outcome {
        SubmitOutcome::Started(handle) => {
            info!(filename = %request.filename, identity = %handle.identity(), "local processing started");
            Ok(accepted(handle.identity()))
        }
        SubmitOutcome::InFlight { identity } => Ok(accepted(identity)),
        SubmitOutcome::AlreadyProcessed(entry) => Ok((
            StatusCode::OK,
            Json(ProcessLocalResponse {
                identity: entry.identity,
                filename: entry.filename,
                package_url: entry.package_url.unwrap_or_default(),
                timestamp: entry.updated_at,
            }),
        )),
        SubmitOutcome::ClaimConflict => Err(ApiError::Conflict(format!(
            "{} is being processed by another worker",
            request.filename
        ))),
    }
}

/// Notifications from the upload layer.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UploadEvent {
    Finished { id: String },
    Progress { id: String, offset: u64, size: u64 },
}

#[derive(Debug, Serialize)]
pub struct UploadEventResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Uuid>,
}

pub async fn upload_event(
    State(state): State<AppState>,
    payload: Result<Json<UploadEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<UploadEventResponse>), ApiError> {
    let Json(event) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;

    match event {
        UploadEvent::Finished { id } => {
            if !is_valid_upload_id(&id) {
                return Err(ApiError::Validation(format!("invalid upload id {:?}", id)));
            }
            let reconciled = state
                .scanner
                .reconcile(&id)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            debug!(upload = %id, outcome = reconciled.label(), "upload finished signal");
            let identity = match &reconciled {
                Reconciled::Started(handle) => Some(handle.identity()),
                Reconciled::InFlight { identity } => Some(*identity),
                Reconciled::Missing => {
                    return Err(ApiError::NotFound(format!("upload {} not found", id)))
                }
                _ => None,
            };
            Ok((
                StatusCode::ACCEPTED,
                Json(UploadEventResponse {
                    status: reconciled.label(),
                    identity,
                }),
            ))
        }
        UploadEvent::Progress { id, offset, size } => {
            if !is_valid_upload_id(&id) {
                return Err(ApiError::Validation(format!("invalid upload id {:?}", id)));
            }
            let percent = if size == 0 {
                0.0
            } else {
                (offset.min(size) as f64 / size as f64) * 100.0
            };
            state
                .bus
                .broadcast(&NotificationEvent::UploadProgress { percent });
            Ok((
                StatusCode::ACCEPTED,
                Json(UploadEventResponse {
                    status: "progress",
                    identity: None,
                }),
            ))
        }
    }
}

pub async fn health() -> &'static str {
    "ok"
}
