use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod gap;
pub mod leaderboard;
pub mod state_store;
pub mod tracker;

use crate::api::{
    MESSAGE_FORBIDDEN, MESSAGE_NOT_FOUND, MESSAGE_RECORD_FAILED, MESSAGE_USERNAME_REQUIRED,
    ROUTE_LIE, ROUTE_STATE, StateResponse, parse_record_lie_request,
};
use crate::config::Config;
use crate::gap::GapPolicy;
use crate::tracker::{LieTracker, TrackerError};

const SERVICE_NAME: &str = "lie-tracker-service";
const CACHE_NO_STORE: &str = "no-store";
const INDEX_DOCUMENT: &str = "index.html";

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    tracker: LieTracker,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    gap_policy: &'static str,
    workday_window: Option<String>,
    uptime_seconds: u64,
}

pub fn build_router(config: Config) -> Router {
    let tracker = LieTracker::from_config(&config);
    build_router_with_tracker(config, tracker)
}

pub fn build_router_with_tracker(config: Config, tracker: LieTracker) -> Router {
    let state = AppState {
        config: Arc::new(config),
        tracker,
        started_at: SystemTime::now(),
    };

    let api_router = Router::new()
        .route(ROUTE_STATE, get(state_snapshot).fallback(api_not_found))
        .route(ROUTE_LIE, post(record_lie).fallback(api_not_found))
        .route("/api", any(api_not_found))
        .route("/api/*path", any(api_not_found));

    Router::new()
        .route("/healthz", get(health))
        .merge(api_router)
        .fallback(static_file)
        .with_state(state)
        .layer(middleware::from_fn(no_store_gate))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

async fn no_store_gate(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_NO_STORE));
    response
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    let gap_policy = state.tracker.gap_policy();
    let workday_window = match gap_policy {
        GapPolicy::Workday { window, .. } => Some(format!(
            "{}-{}",
            clock_label(window.start_minute()),
            clock_label(window.end_minute())
        )),
        GapPolicy::Raw => None,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        gap_policy: gap_policy.name(),
        workday_window,
        uptime_seconds,
    })
}

fn clock_label(minute_of_day: u32) -> String {
    format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60)
}

async fn state_snapshot(State(state): State<AppState>) -> Json<StateResponse> {
    let snapshot = state.tracker.snapshot().await;
    Json(StateResponse::from_snapshot(snapshot))
}

async fn record_lie(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match parse_record_lie_request(&body) {
        Ok(payload) => payload,
        Err(error) => return plain_text(StatusCode::BAD_REQUEST, error.message()),
    };
    let username = payload.username.unwrap_or_default();
    let now_ms = Utc::now().timestamp_millis();

    match state.tracker.record_lie(&username, now_ms).await {
        Ok(snapshot) => Json(StateResponse::from_snapshot(snapshot)).into_response(),
        Err(TrackerError::InvalidInput { .. }) => {
            plain_text(StatusCode::BAD_REQUEST, MESSAGE_USERNAME_REQUIRED)
        }
        Err(TrackerError::Persistence { .. }) => {
            plain_text(StatusCode::INTERNAL_SERVER_ERROR, MESSAGE_RECORD_FAILED)
        }
    }
}

async fn api_not_found() -> Response {
    plain_text(StatusCode::NOT_FOUND, MESSAGE_NOT_FOUND)
}

async fn static_file(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return plain_text(StatusCode::NOT_FOUND, MESSAGE_NOT_FOUND);
    }

    let relative_path = match resolve_static_path(uri.path()) {
        Ok(path) => path,
        Err(StaticPathError::Undecodable) => {
            return plain_text(StatusCode::NOT_FOUND, MESSAGE_NOT_FOUND);
        }
        Err(StaticPathError::Traversal) => {
            return plain_text(StatusCode::FORBIDDEN, MESSAGE_FORBIDDEN);
        }
    };

    let file_path = state.config.public_dir.join(relative_path);
    match build_static_response(&file_path).await {
        Ok(response) => response,
        Err(StaticResponseError::NotFound) => plain_text(StatusCode::NOT_FOUND, MESSAGE_NOT_FOUND),
        Err(error) => {
            tracing::warn!(
                target: "lie_tracker.http",
                path = %file_path.display(),
                error = %error,
                "failed to serve static asset",
            );
            plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to serve static asset")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaticPathError {
    Undecodable,
    Traversal,
}

/// Maps a request path onto a file below the public directory: percent-decodes it,
/// sends `/` (and any trailing `/`) to the index document and refuses `..` segments.
fn resolve_static_path(raw_path: &str) -> Result<PathBuf, StaticPathError> {
    let decoded = urlencoding::decode(raw_path).map_err(|_| StaticPathError::Undecodable)?;
    if decoded.contains('\0') || decoded.contains('\\') {
        return Err(StaticPathError::Traversal);
    }

    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StaticPathError::Traversal),
            _ => relative.push(segment),
        }
    }

    if decoded.ends_with('/') || relative.as_os_str().is_empty() {
        relative.push(INDEX_DOCUMENT);
    }

    Ok(relative)
}

async fn build_static_response(file_path: &FsPath) -> Result<Response, StaticResponseError> {
    let metadata = tokio::fs::metadata(file_path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            StaticResponseError::NotFound
        } else {
            StaticResponseError::Io(source)
        }
    })?;
    if !metadata.is_file() {
        return Err(StaticResponseError::NotFound);
    }

    let bytes = tokio::fs::read(file_path).await?;
    let content_type = mime_guess::from_path(file_path).first_or_octet_stream();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type.as_ref())
            .map_err(|_| StaticResponseError::InvalidHeader(content_type.to_string()))?,
    );

    Ok(response)
}

#[derive(Debug, thiserror::Error)]
enum StaticResponseError {
    #[error("static file not found")]
    NotFound,
    #[error("static file read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid header value '{0}'")]
    InvalidHeader(String),
}

fn plain_text(status: StatusCode, message: &'static str) -> Response {
    (status, message).into_response()
}
