//! Metrics API Server
//!
//! HTTP ingest and query endpoints for the aggregator. Every request is
//! validated here; the store only ever sees well-formed records.

use crate::domain::entities::Metric;
use crate::domain::errors::StoreError;
use crate::domain::ports::MetricStore;
use crate::domain::value_objects::MetricKind;
use crate::infrastructure::ShutdownController;
use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Request rejected before reaching the store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("metric type is required")]
    MissingType,
    #[error("metric id is required")]
    MissingId,
    #[error("unknown metric type: {0}")]
    UnknownType(String),
    #[error("invalid metric value: {0}")]
    InvalidValue(String),
    #[error("malformed body: {0}")]
    MalformedBody(String),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::MissingType | IngestError::MissingId => StatusCode::NOT_FOUND,
            IngestError::UnknownType(_)
            | IngestError::InvalidValue(_)
            | IngestError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Any failure a handler can produce. Rendered as a bare status code.
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Ingest(e) => e.status(),
            ApiError::Store(StoreError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Connection(_) | StoreError::Storage(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::debug!("request rejected: {}", self);
        }
        status.into_response()
    }
}

/// Metric as it arrives on the wire, before validation.
#[derive(Debug, Default, Deserialize)]
struct RawMetric {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    delta: Option<i64>,
    #[serde(default)]
    value: Option<f64>,
}

fn parse_kind(raw: Option<&str>) -> Result<MetricKind, IngestError> {
    match raw {
        None | Some("") => Err(IngestError::MissingType),
        Some(s) => s
            .parse()
            .map_err(|_| IngestError::UnknownType(s.to_string())),
    }
}

fn parse_id(raw: Option<String>) -> Result<String, IngestError> {
    raw.filter(|id| !id.is_empty()).ok_or(IngestError::MissingId)
}

impl RawMetric {
    /// Validate into a domain record. The payload field of the other kind
    /// is dropped.
    fn into_metric(self) -> Result<Metric, IngestError> {
        let kind = parse_kind(self.kind.as_deref())?;
        let id = parse_id(self.id)?;
        match kind {
            MetricKind::Counter => self
                .delta
                .map(|delta| Metric::counter(id.clone(), delta))
                .ok_or_else(|| IngestError::InvalidValue(format!("counter {} has no delta", id))),
            MetricKind::Gauge => self
                .value
                .map(|value| Metric::gauge(id.clone(), value))
                .ok_or_else(|| IngestError::InvalidValue(format!("gauge {} has no value", id))),
        }
    }
}

/// Build a record from the path form `/update/{type}/{name}/{value}`.
fn parse_path_metric(kind: &str, id: String, raw_value: &str) -> Result<Metric, IngestError> {
    let kind = parse_kind(Some(kind))?;
    let id = parse_id(Some(id))?;
    match kind {
        MetricKind::Counter => raw_value
            .parse::<i64>()
            .map(|delta| Metric::counter(id, delta))
            .map_err(|_| IngestError::InvalidValue(raw_value.to_string())),
        MetricKind::Gauge => match raw_value.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Metric::gauge(id, value)),
            _ => Err(IngestError::InvalidValue(raw_value.to_string())),
        },
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, IngestError> {
    serde_json::from_slice(body).map_err(|e| IngestError::MalformedBody(e.to_string()))
}

/// API server state.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn MetricStore>,
    pub shutdown: ShutdownController,
}

impl ApiState {
    pub fn new(store: Arc<dyn MetricStore>, shutdown: ShutdownController) -> Self {
        Self { store, shutdown }
    }
}

/// Build the HTTP router.
///
/// Shorter `/update/...` path forms have no route and fall through to 404.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(list_handler))
        .route("/ping", get(ping_handler))
        .route("/update/", post(update_json_handler))
        .route("/update/:type/:name/:value", post(update_path_handler))
        .route("/updates/", post(updates_handler))
        .route("/value/", post(value_json_handler))
        .route("/value/:type/:name", get(value_path_handler))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Metrics API server.
pub struct ApiServer {
    listen_addr: String,
    state: ApiState,
}

impl ApiServer {
    pub fn new(
        listen_addr: String,
        store: Arc<dyn MetricStore>,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            listen_addr,
            state: ApiState::new(store, shutdown),
        }
    }

    /// Serve until the shutdown controller fires.
    ///
    /// Returns once the listener is closed; in-flight requests may still be
    /// completing and are tracked by the controller.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let shutdown = self.state.shutdown.clone();

        tracing::info!("metrics API listening on {}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;
        tracing::info!("metrics API stopped accepting connections");
        Ok(())
    }
}

async fn track_requests(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let _guard = state.shutdown.track_request();
    next.run(request).await
}

// Handler functions

async fn list_handler(State(state): State<ApiState>) -> Result<Json<Vec<Metric>>, ApiError> {
    Ok(Json(state.store.get_all().await?))
}

async fn ping_handler(State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    state.store.ping().await?;
    Ok(StatusCode::OK)
}

async fn update_json_handler(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let metric = parse_json::<RawMetric>(&body)?.into_metric()?;
    tracing::debug!("update {} {}", metric.kind, metric.id);
    Ok(Json(state.store.save(metric).await?))
}

async fn update_path_handler(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let metric = parse_path_metric(&kind, name, &value)?;
    tracing::debug!("update {} {}", metric.kind, metric.id);
    state.store.save(metric).await?;
    Ok(StatusCode::OK)
}

async fn updates_handler(State(state): State<ApiState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let metrics = parse_json::<Vec<RawMetric>>(&body)?
        .into_iter()
        .map(RawMetric::into_metric)
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!("batch update of {} metrics", metrics.len());
    state.store.save_batch(metrics).await?;
    Ok(StatusCode::OK)
}

async fn value_json_handler(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let raw = parse_json::<RawMetric>(&body)?;
    let kind = parse_kind(raw.kind.as_deref()).map_err(|_| StoreError::NotFound)?;
    let id = parse_id(raw.id)?;
    Ok(Json(state.store.get_by_key(kind, &id).await?))
}

async fn value_path_handler(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind = kind.parse::<MetricKind>().map_err(|_| StoreError::NotFound)?;
    let metric = state.store.get_by_key(kind, &name).await?;
    let text = match kind {
        MetricKind::Counter => metric.delta.map(|d| d.to_string()),
        MetricKind::Gauge => metric.value.map(|v| v.to_string()),
    };
    text.ok_or_else(|| ApiError::Store(StoreError::NotFound))
}
