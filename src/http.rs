//! HTTP front-end for the snapshot server.
//!
//! Thin protocol adapter: every handler parses its query parameters,
//! authenticates against the registry, and delegates to the snapshot
//! cache. Handlers hold no state of their own, so the HTTP surface and
//! the socket surface cannot drift apart in behavior.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::encoding::Rect;
use crate::error::WebInkError;
use crate::logbuf::DeviceLogs;
use crate::mode::{DisplayMode, TileFormat};
use crate::registry::{DeviceRegistry, DeviceSummary};
use crate::snapshot::SnapshotCache;

/// Seconds a client should back off after a transient render failure.
const RETRY_AFTER_SECS: u32 = 30;

/// Shared handles the handlers borrow.
#[derive(Clone)]
pub struct AppState {
    /// Device registry.
    pub registry: Arc<DeviceRegistry>,
    /// Snapshot cache shared with the socket server.
    pub cache: Arc<SnapshotCache>,
    /// Per-device client log buffers.
    pub logs: Arc<DeviceLogs>,
}

/// Builds the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/get_hash", get(get_hash))
        .route("/get_image", get(get_image))
        .route("/get_sleep", get(get_sleep))
        .route("/post_log", post(post_log))
        .route("/api/config", get(api_config))
        .with_state(state)
}

/// Error wrapper that maps the crate taxonomy onto HTTP statuses.
struct ApiError(WebInkError);

impl From<WebInkError> for ApiError {
    fn from(e: WebInkError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WebInkError::UnknownDevice(_) => StatusCode::NOT_FOUND,
            WebInkError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebInkError::BadMode(_)
            | WebInkError::InvalidRect { .. }
            | WebInkError::BadFormat(_)
            | WebInkError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebInkError::ModeConflict { .. } => StatusCode::CONFLICT,
            WebInkError::NavigationTimeout
            | WebInkError::RenderFailed(_)
            | WebInkError::PoolExhausted
            | WebInkError::CaptureTimeout => StatusCode::SERVICE_UNAVAILABLE,
            WebInkError::Io(_) | WebInkError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        debug!("Request failed: {status} {}", self.0);

        let body = Json(ErrorReply { error: self.0.to_string() });
        if status == StatusCode::SERVICE_UNAVAILABLE {
            (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

#[derive(Serialize)]
struct ErrorReply {
    error: String,
}

#[derive(Deserialize)]
struct HashParams {
    api_key: String,
    device: String,
    mode: String,
}

#[derive(Serialize)]
struct HashReply {
    hash: String,
}

async fn get_hash(
    State(state): State<AppState>,
    Query(params): Query<HashParams>,
) -> Result<Json<HashReply>, ApiError> {
    let device = state.registry.authenticate(&params.device, &params.api_key)?;
    let mode: DisplayMode = params.mode.parse()?;
    let hash = state.cache.hash(&device, &mode).await?;
    Ok(Json(HashReply { hash }))
}

#[derive(Deserialize)]
struct ImageParams {
    api_key: String,
    device: String,
    mode: String,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    format: String,
}

async fn get_image(
    State(state): State<AppState>,
    Query(params): Query<ImageParams>,
) -> Result<Response, ApiError> {
    let device = state.registry.authenticate(&params.device, &params.api_key)?;
    let mode: DisplayMode = params.mode.parse()?;
    let format: TileFormat = params.format.parse()?;
    let rect = Rect::new(params.x, params.y, params.w, params.h);

    let tile = state.cache.tile(&device, &mode, rect, format).await?;
    let content_type = device.mode.color.content_type();
    Ok(([(header::CONTENT_TYPE, content_type)], Bytes::from(tile.freeze())).into_response())
}

#[derive(Deserialize)]
struct SleepParams {
    api_key: String,
    device: String,
}

#[derive(Serialize)]
struct SleepReply {
    sleep: u64,
}

async fn get_sleep(
    State(state): State<AppState>,
    Query(params): Query<SleepParams>,
) -> Result<Json<SleepReply>, ApiError> {
    let device = state.registry.authenticate(&params.device, &params.api_key)?;
    Ok(Json(SleepReply { sleep: device.sleep_duration.as_secs() }))
}

async fn post_log(
    State(state): State<AppState>,
    Query(params): Query<SleepParams>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let device = state.registry.authenticate(&params.device, &params.api_key)?;
    state.logs.append(&device.id, &body);
    Ok(StatusCode::NO_CONTENT)
}

async fn api_config(State(state): State<AppState>) -> Json<Vec<DeviceSummary>> {
    Json(state.registry.summaries())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::error::Result;
    use crate::registry::Device;
    use crate::render::Renderer;
    use axum::body::Body;
    use axum::http::Request;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    struct FakeRenderer {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl Renderer for FakeRenderer {
        fn render<'a>(&'a self, device: &'a Device) -> BoxFuture<'a, Result<Vec<u8>>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail.load(Ordering::SeqCst) {
                    return Err(WebInkError::RenderFailed("dashboard 500".to_string()));
                }
                let len = (device.mode.width * device.mode.height * 3) as usize;
                Ok((0..len).map(|i| (i % 251) as u8).collect())
            })
        }
    }

    fn test_app(mode: &str) -> (Router, AppState, Arc<FakeRenderer>) {
        let registry = Arc::new(
            DeviceRegistry::from_config(&[DeviceConfig {
                id: "dev1".to_string(),
                api_key: "K".to_string(),
                url: "http://dashboard:8080/render/dev1".to_string(),
                mode: mode.to_string(),
                refresh_interval: 60,
                sleep_duration: 300,
            }])
            .unwrap(),
        );
        let renderer = Arc::new(FakeRenderer {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let cache = Arc::new(SnapshotCache::new(
            renderer.clone(),
            &registry,
            Duration::from_secs(5),
        ));
        let logs = Arc::new(DeviceLogs::new(&registry));
        let state = AppState { registry, cache, logs };
        (router(state.clone()), state, renderer)
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_hash_single_render() {
        let (app, _, renderer) = test_app("800x480x1xB");
        let uri = "/get_hash?api_key=K&device=dev1&mode=800x480x1xB";

        let first = get(&app, uri).await;
        assert_eq!(first.status(), StatusCode::OK);
        let first: serde_json::Value =
            serde_json::from_slice(&body_bytes(first).await).unwrap();
        let hash = first["hash"].as_str().unwrap().to_string();
        assert_eq!(hash.len(), 16);

        let second = get(&app, uri).await;
        let second: serde_json::Value =
            serde_json::from_slice(&body_bytes(second).await).unwrap();
        assert_eq!(second["hash"].as_str().unwrap(), hash);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_image_framing() {
        let (app, _, _) = test_app("800x480x1xB");
        let response = get(
            &app,
            "/get_image?api_key=K&device=dev1&mode=800x480x1xB&x=0&y=0&w=800&h=480&format=pbm",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "image/x-portable-bitmap"
        );
        let body = body_bytes(response).await;
        assert!(body.starts_with(b"P4\n800 480\n"));
        assert_eq!(body.len() - b"P4\n800 480\n".len(), 48000);
    }

    #[tokio::test]
    async fn test_sliced_tiles_stitch_with_one_render() {
        let (app, _, renderer) = test_app("800x480x1xB");

        let mut stitched = Vec::new();
        for y in (0..480).step_by(30) {
            let uri = format!(
                "/get_image?api_key=K&device=dev1&mode=800x480x1xB&x=0&y={y}&w=800&h=30&format=pbm"
            );
            let body = body_bytes(get(&app, &uri).await).await;
            stitched.extend_from_slice(&body[b"P4\n800 30\n".len()..]);
        }
        let full = body_bytes(
            get(
                &app,
                "/get_image?api_key=K&device=dev1&mode=800x480x1xB&x=0&y=0&w=800&h=480&format=pbm",
            )
            .await,
        )
        .await;
        assert_eq!(&full[b"P4\n800 480\n".len()..], &stitched[..]);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (app, _, renderer) = test_app("800x480x1xB");

        let cases = [
            ("/get_hash?api_key=bad&device=dev1&mode=800x480x1xB", StatusCode::UNAUTHORIZED),
            ("/get_hash?api_key=K&device=ghost&mode=800x480x1xB", StatusCode::NOT_FOUND),
            ("/get_hash?api_key=K&device=dev1&mode=junk", StatusCode::BAD_REQUEST),
            // Well-formed mode that conflicts with the configured one.
            ("/get_hash?api_key=K&device=dev1&mode=800x480x8xG", StatusCode::CONFLICT),
            (
                "/get_image?api_key=K&device=dev1&mode=800x480x1xB&x=0&y=0&w=800&h=480&format=pgm",
                StatusCode::BAD_REQUEST,
            ),
            // Rectangle spills past the right edge.
            (
                "/get_image?api_key=K&device=dev1&mode=800x480x1xB&x=400&y=0&w=401&h=8&format=pbm",
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (uri, status) in cases {
            assert_eq!(get(&app, uri).await.status(), status, "{uri}");
        }
        // None of the rejected requests reached the renderer.
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_render_failure_maps_to_503_with_retry_after() {
        let (app, _, renderer) = test_app("800x480x1xB");
        renderer.fail.store(true, Ordering::SeqCst);

        let response = get(
            &app,
            "/get_image?api_key=K&device=dev1&mode=800x480x1xB&x=0&y=0&w=800&h=8&format=pbm",
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        // The fault clears; the next request renders fine.
        renderer.fail.store(false, Ordering::SeqCst);
        let response = get(
            &app,
            "/get_image?api_key=K&device=dev1&mode=800x480x1xB&x=0&y=0&w=800&h=8&format=pbm",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_sleep() {
        let (app, _, _) = test_app("800x480x1xB");
        let body = body_bytes(get(&app, "/get_sleep?api_key=K&device=dev1").await).await;
        let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply["sleep"], 300);
    }

    #[tokio::test]
    async fn test_post_log_and_auth() {
        let (app, state, _) = test_app("800x480x1xB");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/post_log?api_key=K&device=dev1")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.logs.lines("dev1"), vec!["hello"]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/post_log?api_key=bad&device=dev1")
                    .body(Body::from("intruder"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        // The rejected line never landed.
        assert_eq!(state.logs.lines("dev1"), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_api_config_redacts_keys() {
        let (app, _, _) = test_app("800x480x1xB");
        let body = body_bytes(get(&app, "/api/config").await).await;
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("dev1"));
        assert!(!text.contains("api_key"));
    }
}
