//! HTTP JSON server: graph routes, a server-sent change feed, and health.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use atlas_core::{DEFAULT_SEARCH_LIMIT, GraphId, GraphIdError, TraceRequest, neighborhood};
use atlas_store::Store;

use crate::config::AtlasConfig;
use crate::service::GraphService;
use crate::watch::{self, ChangeEvent, ChangePoller};

const CHANGE_CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Mutex<GraphService>>,
    pub changes: broadcast::Sender<ChangeEvent>,
    /// Ends open change streams so graceful shutdown can finish.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(service: GraphService, shutdown: CancellationToken) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            service: Arc::new(Mutex::new(service)),
            changes,
            shutdown,
        }
    }
}

// --- Errors ---

pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<GraphIdError> for ApiError {
    fn from(e: GraphIdError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(e) => {
                tracing::warn!("request failed: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// --- Query strings ---

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OverviewParams {
    memories: bool,
    historical: bool,
}

#[derive(Debug, Deserialize)]
struct NeighborhoodParams {
    id: String,
    depth: Option<usize>,
    #[serde(default)]
    historical: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraceParams {
    from: String,
    to: String,
    max_depth: Option<usize>,
    #[serde(default)]
    historical: bool,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LayoutParams {
    memories: bool,
}

// --- Handlers ---

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn overview(
    State(state): State<AppState>,
    Query(params): Query<OverviewParams>,
) -> ApiResult<atlas_core::OverviewGraph> {
    let mut service = state.service.lock().await;
    Ok(Json(service.overview(params.memories, params.historical)?))
}

async fn neighborhood_route(
    State(state): State<AppState>,
    Query(params): Query<NeighborhoodParams>,
) -> ApiResult<atlas_core::NeighborhoodGraph> {
    let focus: GraphId = params.id.parse()?;
    let depth = params.depth.unwrap_or(neighborhood::MIN_DEPTH);
    let mut service = state.service.lock().await;
    Ok(Json(service.neighborhood(focus, depth, params.historical)?))
}

async fn trace(
    State(state): State<AppState>,
    Query(params): Query<TraceParams>,
) -> ApiResult<atlas_core::TraceGraph> {
    let mut request = TraceRequest::new(params.from.parse()?, params.to.parse()?);
    if let Some(max_depth) = params.max_depth {
        request = request.with_max_depth(max_depth);
    }
    let mut service = state.service.lock().await;
    Ok(Json(service.trace(request, params.historical)?))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<atlas_core::SearchHit>> {
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let service = state.service.lock().await;
    Ok(Json(service.search(&params.q, limit)?))
}

async fn insights(State(state): State<AppState>) -> ApiResult<atlas_core::Insights> {
    let service = state.service.lock().await;
    Ok(Json(service.insights()?))
}

async fn layout(
    State(state): State<AppState>,
    Query(params): Query<LayoutParams>,
) -> ApiResult<atlas_core::LayoutGraph> {
    let mut service = state.service.lock().await;
    Ok(Json(service.layout(params.memories)?))
}

/// `GET /api/changes`: one `change` event per store change.
async fn changes(State(state): State<AppState>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = state.changes.subscribe();
    let shutdown = state.shutdown.clone();
    let stream = async_stream::stream! {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok::<_, Infallible>(Event::default().event("change").data(json));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping"))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/graph/overview", get(overview))
        .route("/api/graph/neighborhood", get(neighborhood_route))
        .route("/api/graph/trace", get(trace))
        .route("/api/search", get(search))
        .route("/api/insights", get(insights))
        .route("/api/layout", get(layout))
        .route("/api/changes", get(changes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve until `shutdown` is cancelled. Also runs the change watcher and a
/// task that drops the cached projection whenever the store changes.
pub async fn serve(db: &Path, config: &AtlasConfig, bind: &str, shutdown: CancellationToken) -> Result<()> {
    let service = GraphService::open(db, config)?;
    let state = AppState::new(service, shutdown.clone());
    let tracker = TaskTracker::new();

    let poller = ChangePoller::new(
        Store::open(db).with_context(|| format!("failed to open watcher connection on {}", db.display()))?,
    );
    tracker.spawn(watch::run(
        poller,
        Duration::from_secs(config.poll_interval_secs.max(1)),
        state.changes.clone(),
        shutdown.clone(),
    ));

    let mut rx = state.changes.subscribe();
    let invalidate_service = state.service.clone();
    let invalidate_cancel = shutdown.clone();
    tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = invalidate_cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        invalidate_service.lock().await.invalidate_projection();
                        tracing::debug!("projection cache invalidated");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
    tracker.close();

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let addr = listener.local_addr().context("failed to read bound address")?;
    tracing::info!("listening on http://{addr}");

    let graceful = shutdown.clone();
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
        .context("http server failed");

    shutdown.cancel();
    tracker.wait().await;
    tracing::info!("server stopped");
    result
}
