//! Query API, upload-layer hook and the observer WebSocket.

pub mod api;
pub mod error;
pub mod ws;

use crate::adapters::local::events::NotificationBus;
use crate::adapters::local::library::LocalLibrary;
use crate::application::catalog::Catalog;
use crate::application::ingest::IngestService;
use crate::application::scanner::Scanner;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestService>,
    pub scanner: Arc<Scanner>,
    pub catalog: Arc<Catalog>,
    pub bus: Arc<NotificationBus>,
    pub library: LocalLibrary,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/videos", get(api::list_videos))
        .route("/api/videos/local", post(api::process_local))
        .route("/api/videos/:identity/status", get(api::video_status))
        .route("/api/uploads/events", post(api::upload_event))
        .route("/ws", get(ws::observe))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::catalog::VideoState;
    use crate::domain::attempt::SourceRef;
    use crate::testing::{fixed_prober, Harness, ScriptedEncoder};
    use axum::body::{to_bytes, Body};
    use axum::extract::ws::Message;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(harness: &Harness) -> Router {
        router(AppState {
            ingest: harness.ingest.clone(),
            scanner: harness.scanner.clone(),
            catalog: harness.catalog.clone(),
            bus: harness.bus.clone(),
            library: harness.library.clone(),
        })
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_state(harness: &Harness, identity: Uuid, state: VideoState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if harness
                    .catalog
                    .find_by_identity(identity)
                    .is_some_and(|entry| entry.state == state)
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("catalog never reached the expected state");
    }

    async fn harness() -> Harness {
        Harness::new(Arc::new(ScriptedEncoder::new()), fixed_prober(1920, 1080)).await
    }

    #[tokio::test]
    async fn test_health() {
        let harness = harness().await;
        let response = app(&harness).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_process_local_then_already_processed() {
        let harness = harness().await;
        harness.write_local("clip.mp4").await;

        let (status, body) =
            call(app(&harness), post_json("/api/videos/local", json!({"filename": "clip.mp4"}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["filename"], "clip.mp4");
        let identity: Uuid = body["identity"].as_str().unwrap().parse().unwrap();
        assert_eq!(body["packageUrl"], format!("/streams/{}/master.m3u8", identity));

        wait_for_state(&harness, identity, VideoState::Processed).await;

        let (status, body) = call(
            app(&harness),
            get(&format!("/api/videos/{}/status", identity)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processed");
        assert_eq!(body["packageUrl"], format!("/streams/{}/master.m3u8", identity));

        let (status, body) =
            call(app(&harness), post_json("/api/videos/local", json!({"filename": "clip.mp4"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["identity"], identity.to_string());

        // Local sources are never deleted.
        assert!(harness.videos_dir().join("clip.mp4").exists());
    }

    #[tokio::test]
    async fn test_single_quality_request() {
        let harness = harness().await;
        harness.write_local("clip.mov").await;

        let (status, body) = call(
            app(&harness),
            post_json(
                "/api/videos/local",
                json!({"filename": "clip.mov", "singleQuality": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["packageUrl"].as_str().unwrap().ends_with("/playlist.m3u8"));
    }

    #[tokio::test]
    async fn test_process_local_errors() {
        let harness = harness().await;
        harness.write_local("notes.txt").await;
        harness.write_local("held.mp4").await;
        let held = SourceRef::local("held.mp4", harness.videos_dir().join("held.mp4"));
        harness.claims.claim(&held, Uuid::new_v4()).await.unwrap().unwrap();

        let cases = [
            (json!({"filename": "../etc/passwd.mp4"}), StatusCode::BAD_REQUEST),
            (json!({"filename": "notes.txt"}), StatusCode::BAD_REQUEST),
            (json!({"name": "clip.mp4"}), StatusCode::BAD_REQUEST),
            (json!({"filename": "missing.mp4"}), StatusCode::NOT_FOUND),
            (json!({"filename": "held.mp4"}), StatusCode::CONFLICT),
        ];
        for (request, expected) in cases {
            let (status, body) = call(app(&harness), post_json("/api/videos/local", request.clone())).await;
            assert_eq!(status, expected, "request {}", request);
            assert!(body["error"].is_string(), "request {}", request);
        }
        assert!(harness.catalog.get(&held.key).is_none());
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let harness = harness().await;
        let request = Request::post("/api/videos/local")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = call(app(&harness), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_status_errors() {
        let harness = harness().await;
        let (status, body) = call(app(&harness), get("/api/videos/not-a-uuid/status")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) =
            call(app(&harness), get(&format!("/api/videos/{}/status", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_list_merges_catalog_and_library() {
        let harness = harness().await;
        harness.write_local("a.mp4").await;
        harness.write_local("b.mkv").await;
        let (_, body) =
            call(app(&harness), post_json("/api/videos/local", json!({"filename": "a.mp4"}))).await;
        let identity: Uuid = body["identity"].as_str().unwrap().parse().unwrap();
        wait_for_state(&harness, identity, VideoState::Processed).await;

        let (status, body) = call(app(&harness), get("/api/videos")).await;
        assert_eq!(status, StatusCode::OK);
        let listing = body.as_array().unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0]["filename"], "a.mp4");
        assert_eq!(listing[0]["processed"], true);
        assert_eq!(listing[1]["filename"], "b.mkv");
        assert_eq!(listing[1]["processed"], false);
        assert!(listing[1].get("packageUrl").is_none());
    }

    #[tokio::test]
    async fn test_upload_finished_signal() {
        let harness = harness().await;
        harness.write_upload("up1", b"12345", Some(5)).await;
        harness.write_upload("up2", b"123", Some(5)).await;

        let (status, body) = call(
            app(&harness),
            post_json("/api/uploads/events", json!({"type": "finished", "id": "up1"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "started");
        let identity: Uuid = body["identity"].as_str().unwrap().parse().unwrap();
        wait_for_state(&harness, identity, VideoState::Processed).await;
        assert_eq!(harness.catalog.find_by_identity(identity).unwrap().filename, "up1.mp4");

        let (_, body) = call(
            app(&harness),
            post_json("/api/uploads/events", json!({"type": "finished", "id": "up2"})),
        )
        .await;
        assert_eq!(body["status"], "incomplete");

        let (status, _) = call(
            app(&harness),
            post_json("/api/uploads/events", json!({"type": "finished", "id": "../up1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            app(&harness),
            post_json("/api/uploads/events", json!({"type": "finished", "id": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_progress_is_broadcast() {
        let harness = harness().await;
        let observer = harness.bus.register();

        let (status, _) = call(
            app(&harness),
            post_json(
                "/api/uploads/events",
                json!({"type": "progress", "id": "up1", "offset": 25, "size": 100}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let Some(Message::Text(json)) = observer.next_outbound().await else {
            panic!("expected a text frame");
        };
        let event: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(event, json!({"type": "upload-progress", "percent": 25.0}));
    }
}
