//! HTTP route handlers.
//!
//! The transport's only jobs are to build a [`RequestContext`] from the
//! request headers and to translate between JSON wire types and the
//! ingester; everything else lives below this layer.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use tephra_common::{context::SOURCE_METADATA_KEY, RequestContext};

use crate::error::IngestError;
use crate::metrics::Metrics;
use crate::wire::{
    LabelNamesResponse, LabelValuesResponse, QueryRequest, QueryResponse, WriteRequest,
    WriteResponse,
};
use crate::Ingester;

/// Header carrying the tenant identifier.
pub const TENANT_ID_HEADER: &str = "x-scope-orgid";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub ingester: Arc<Ingester>,
    pub metrics: Arc<Metrics>,
}

/// Error response wrapper converting [`IngestError`] into HTTP responses.
pub struct ApiError(IngestError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            IngestError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "bad_data"),
            IngestError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            IngestError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            IngestError::Transient(_) | IngestError::Fatal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };

        let body = serde_json::json!({
            "status": "error",
            "errorType": error_type,
            "error": self.0.to_string()
        });

        (status, Json(body)).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError(err)
    }
}

/// Builds the request context from transport headers: the tenant id plus
/// the first entry of the forwarded chain as the telemetry source tag.
pub fn context_from_headers(headers: &HeaderMap) -> RequestContext {
    let mut ctx = RequestContext::new();
    if let Some(tenant) = headers.get(TENANT_ID_HEADER).and_then(|v| v.to_str().ok()) {
        if !tenant.is_empty() {
            ctx = ctx.with_tenant(tenant);
        }
    }
    if let Some(forwarded) = headers
        .get(SOURCE_METADATA_KEY)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            ctx = ctx.with_source(first.trim());
        }
    }
    ctx
}

/// Handle POST /api/v1/push
pub async fn handle_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<WriteRequest>,
) -> Result<Json<WriteResponse>, ApiError> {
    let ctx = context_from_headers(&headers);
    state.ingester.push(&ctx, request).await?;
    Ok(Json(WriteResponse {}))
}

/// Handle POST /api/v1/query
pub async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let ctx = context_from_headers(&headers);
    Ok(Json(state.ingester.query(&ctx, request).await?))
}

/// Handle GET /api/v1/labels
pub async fn handle_label_names(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LabelNamesResponse>, ApiError> {
    let ctx = context_from_headers(&headers);
    Ok(Json(state.ingester.label_names(&ctx).await?))
}

/// Handle GET /api/v1/label/{name}/values
pub async fn handle_label_values(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<LabelValuesResponse>, ApiError> {
    let ctx = context_from_headers(&headers);
    Ok(Json(state.ingester.label_values(&ctx, &name).await?))
}

/// Handle GET /metrics - Prometheus text format
pub async fn handle_metrics(State(state): State<AppState>) -> String {
    state.metrics.encode()
}

/// Handle GET /-/healthy
pub async fn handle_healthy() -> &'static str {
    "ok"
}

/// Handle GET /-/ready
pub async fn handle_ready() -> &'static str {
    "ok"
}
